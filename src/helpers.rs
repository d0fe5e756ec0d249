pub mod bootstrap;
pub mod ip;
pub mod logging;
pub mod rabbit;
pub mod stop;
