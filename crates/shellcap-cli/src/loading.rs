// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Loading indicator for background work
//!
//! Jobs run on scoped threads while a UI thread redraws `message` followed by
//! a growing row of dots. The line is cleared once every job has finished.

use crossterm::{
    QueueableCommand, cursor,
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Time between animation frames
pub const FRAME_INTERVAL: Duration = Duration::from_millis(500);

const MAX_DOTS: usize = 3;
const STOP_CHECK: Duration = Duration::from_millis(25);

/// Run every job to completion while animating `message` on `out`
///
/// Results come back in job order. A panicking job panics the caller once
/// the animation has been cleared.
pub fn run_with_spinner<T, F>(
    out: &mut (dyn Write + Send),
    message: &str,
    jobs: Vec<F>,
) -> io::Result<Vec<T>>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    run_with_spinner_every(out, message, FRAME_INTERVAL, jobs)
}

pub fn run_with_spinner_every<T, F>(
    out: &mut (dyn Write + Send),
    message: &str,
    interval: Duration,
    jobs: Vec<F>,
) -> io::Result<Vec<T>>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let done = AtomicBool::new(false);
    let done = &done;

    thread::scope(|scope| {
        let animation = scope.spawn(move || animate(out, message, interval, done));
        let handles: Vec<_> = jobs.into_iter().map(|job| scope.spawn(job)).collect();
        let results: Vec<thread::Result<T>> = handles.into_iter().map(|h| h.join()).collect();

        done.store(true, Ordering::Release);
        let drawn = animation
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

        let results = results
            .into_iter()
            .map(|r| r.unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect();
        drawn.map(|()| results)
    })
}

fn animate(
    out: &mut (dyn Write + Send),
    message: &str,
    interval: Duration,
    done: &AtomicBool,
) -> io::Result<()> {
    let mut dots = 0;
    while !done.load(Ordering::Acquire) {
        clear_line(out)?;
        write!(out, "{}{}", message, ".".repeat(dots))?;
        out.flush()?;
        dots = (dots + 1) % (MAX_DOTS + 1);

        let mut waited = Duration::ZERO;
        while waited < interval && !done.load(Ordering::Acquire) {
            let step = STOP_CHECK.min(interval - waited);
            thread::sleep(step);
            waited += step;
        }
    }
    clear_line(out)?;
    out.flush()
}

fn clear_line(out: &mut (dyn Write + Send)) -> io::Result<()> {
    out.queue(cursor::MoveToColumn(0))?;
    out.queue(Clear(ClearType::CurrentLine))?;
    Ok(())
}
