pub mod context;
pub mod generate;
pub mod stt;
pub mod tts;
pub mod turn;

pub use context::ContextAggregator;
pub use generate::GenerateStage;
pub use stt::SttStage;
pub use tts::TtsStage;
pub use turn::TurnDetectorStage;
