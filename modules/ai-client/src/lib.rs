pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{GenerateOptions, TextGenerator};
pub use util::{strip_code_blocks, truncate_to_char_boundary};
