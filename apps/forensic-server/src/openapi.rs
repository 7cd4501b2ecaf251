use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "forensic-server", description = "Forensic report generation and fine-tune feedback loop"),
    paths(
        crate::api::models::status,
        crate::api::models::promote_model,
        crate::api::generate::generate_section,
        crate::api::feedback::store_feedback,
        crate::api::finetune::trigger_finetune,
        crate::api::spec::openapi_json,
    ),
    components(schemas(
        crate::models::ModelStatus,
        crate::api::models::PromoteModelRequest,
        crate::api::models::PromoteModelResponse,
        crate::generation::GenerateRequest,
        crate::generation::GeneratedSection,
        crate::feedback::FeedbackSubmission,
        crate::feedback::RecordOutcome,
        crate::api::finetune::TriggerRequest,
        crate::api::finetune::TriggerSkipped,
        crate::api::finetune::TriggerSubmitted,
        crate::provider::FineTuneJob,
    )),
    tags(
        (name = "Models", description = "Active model status and promotion"),
        (name = "Reports", description = "Report section generation"),
        (name = "Feedback", description = "Ratings on generated sections"),
        (name = "Fine-tuning", description = "Fine-tune job submission"),
        (name = "Specs", description = "API description")
    )
)]
pub struct ApiDoc;
