use anyhow::Result;
use clap::Args;
use futures::executor;

use tracewatch::target_queue::{self, TargetQueue};

#[derive(Args, Clone)]
pub struct Params {
    #[clap(flatten)]
    queue: target_queue::Params,
}

pub fn handle(params: Params) -> Result<()> {
    executor::block_on(async move {
        let queue = TargetQueue::connect(&params.queue, "watch-tools").await?;
        println!("{}", queue.depth().await?);
        Ok(())
    })
}
