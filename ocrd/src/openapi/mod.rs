//! OpenAPI documentation for the extraction API.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ocrd",
        description = "Extract text from uploaded images with Tesseract."
    ),
    paths(api::handlers::ocr::extract_text),
    tags(
        (name = "ocr", description = "Optical character recognition")
    )
)]
pub struct ApiDoc;
