pub mod exchange;
pub mod lifecycle;
pub mod presenter;
pub mod report;

pub use exchange::{connect, BinanceGateway, BybitGateway};
pub use lifecycle::{ComponentFactory, Components, PollController, PollOptions};
pub use presenter::Presenter;
