//! A toy task scheduler driven by a cancellation token.
//!
//! Queued tasks run until an external decision abandons the batch; the
//! scheduler polls its token between tasks and a listener reports the
//! reason once cancellation lands.

use cancel_token::{Source, Token};

fn run_batch(token: &Token, tasks: &[&str]) -> usize {
    let mut completed = 0;
    for task in tasks {
        if let Err(cancelled) = token.check() {
            println!("batch abandoned before '{}': {}", task, cancelled);
            break;
        }
        println!("running {}", task);
        completed += 1;
    }
    completed
}

fn main() {
    tracing_subscriber::fmt::init();

    let source = Source::new();
    let token = source.token();

    token.on_cancelled(|reason| {
        println!("listener observed cancellation: {}", reason);
    });

    // First batch runs to completion.
    let done = run_batch(&token, &["compact-index", "refresh-cache"]);
    println!("completed {} tasks\n", done);

    // An operator decision arrives mid-queue for the second batch: simulate
    // it by cancelling between the scheduling decision and the run.
    source.cancel("operator requested shutdown");
    let done = run_batch(&token, &["rebuild-search", "send-digests"]);
    println!("completed {} tasks after cancellation", done);
}
