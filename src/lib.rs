pub mod client;
pub mod endpoint;
pub mod hl7;
pub mod listener;
pub mod logging;
pub mod mllp;
pub mod peer;
pub mod proxy;
pub mod queue;
pub mod session;
pub mod settings;

pub use proxy::ProxySupervisor;
pub use settings::Settings;
