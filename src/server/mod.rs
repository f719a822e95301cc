pub mod classifier;
pub mod handler;
pub mod message;
pub mod orchestrator;
pub mod types;

pub use self::classifier::{AnswerClassifier, Classified, Verdict};
pub use self::handler::DnsHandler;
pub use self::orchestrator::{Orchestrator, Resolution};
