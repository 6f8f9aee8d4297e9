pub mod archive;
pub mod audio;
pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod server;
pub mod session;

pub use audio::{AudioFormat, WavFileWriter};
pub use config::Config;
pub use server::{create_router, AppState};
pub use session::{CloseReason, Session, SessionStats, SessionSummary};
