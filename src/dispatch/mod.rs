//! Parse request handling: form options, orchestration and response shaping

mod dispatcher;
mod images;
mod options;
mod response;

pub use dispatcher::{new_request_id, Dispatcher, SUPPORTED_EXTENSIONS};
pub use images::{data_uri, embed_markdown_images, encode_images, mime_type, referenced_images};
pub use options::{ParseOptions, ParseUpload};
pub use response::{
    chunks_from_content_list, chunks_from_markdown, markdown_to_html, shape, ParseResponse,
    ResponseContext,
};
