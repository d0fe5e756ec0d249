mod handle;

pub use handle::RabbitHandle;
