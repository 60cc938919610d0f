pub mod extract;
pub mod functions;
pub mod models;
pub mod storage;
pub mod transform;
pub mod utils;

pub use extract::Extractor;
pub use functions::{FunctionResponse, WeatherFunction};
pub use transform::Transformer;
