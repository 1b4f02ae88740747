pub use paste;
pub use tokio;

mod autocow;
pub mod proxy;

pub use autocow::Ac;
