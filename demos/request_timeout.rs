//! Guarding a slow "request" with a timeout token.

use cancel_token::timer::timeout;
use cancel_token::CancellableFutureExt;
use futures::channel::oneshot;
use futures::executor::block_on;
use std::thread;
use std::time::Duration;

fn send_request(latency: Duration) -> oneshot::Receiver<&'static str> {
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        thread::sleep(latency);
        let _ = tx.send("200 OK");
    });
    rx
}

fn main() {
    tracing_subscriber::fmt::init();

    // Fast request beats its deadline.
    let guard = timeout(Duration::from_millis(300));
    let outcome = block_on(send_request(Duration::from_millis(20)).cancellable(guard.token()));
    match outcome {
        Ok(response) => println!("fast request: {:?}", response),
        Err(cancelled) => println!("fast request cancelled: {}", cancelled),
    }

    // Slow request loses to the timer.
    let guard = timeout(Duration::from_millis(50));
    let outcome = block_on(send_request(Duration::from_millis(400)).cancellable(guard.token()));
    match outcome {
        Ok(response) => println!("slow request: {:?}", response),
        Err(cancelled) => println!("slow request cancelled: {}", cancelled),
    }
}
