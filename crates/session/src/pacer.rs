//! Outbound audio pacing
//!
//! TTS produces audio much faster than real time. The pacer holds outbound
//! packets and releases them at one frame duration apart so the device
//! receives audio at playback rate. Control callbacks can be interleaved
//! with audio and run in submission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{sleep, Duration, Instant};

/// A queued callback, run when it reaches the queue head.
pub type PacerCallback = Box<dyn FnOnce() + Send>;

enum PacerItem {
    Audio(Vec<u8>),
    Message(PacerCallback),
}

#[derive(Default)]
struct PacerState {
    queue: VecDeque<PacerItem>,
    play_position_ms: u64,
    started_at: Option<Instant>,
}

/// Rate-limited outbound queue.
pub struct AudioPacer {
    state: Mutex<PacerState>,
    data_notify: Notify,
    reset_notify: Notify,
    frame_duration: Duration,
    stopped: AtomicBool,
}

impl AudioPacer {
    pub fn new(frame_duration_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PacerState::default()),
            data_notify: Notify::new(),
            reset_notify: Notify::new(),
            frame_duration: Duration::from_millis(frame_duration_ms.max(1)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Queue an audio packet for paced emission.
    pub fn enqueue_audio(&self, packet: Vec<u8>) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.state.lock().queue.push_back(PacerItem::Audio(packet));
        self.data_notify.notify_one();
    }

    /// Queue a callback; it runs as soon as it reaches the queue head.
    pub fn enqueue_message(&self, callback: PacerCallback) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.state
            .lock()
            .queue
            .push_back(PacerItem::Message(callback));
        self.data_notify.notify_one();
    }

    /// Drop everything queued and zero the timing state. An in-flight
    /// pacing wait is cancelled so the next segment paces from time zero.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.queue.clear();
            state.play_position_ms = 0;
            state.started_at = None;
        }
        self.reset_notify.notify_waiters();
    }

    /// Stop the pacing loop permanently.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.reset();
        self.data_notify.notify_waiters();
    }

    pub fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Consumer loop. `send` delivers one audio packet; send failures are
    /// the callee's concern and never stop the loop.
    pub async fn run<F>(self: Arc<Self>, send: F)
    where
        F: Fn(Vec<u8>) + Send + 'static,
    {
        enum Head {
            Empty,
            Message,
            Audio,
        }

        enum Step {
            Idle,
            Run(PacerCallback),
            Wait(Duration),
            Send(Vec<u8>),
        }

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            let step = {
                let mut state = self.state.lock();
                let head = match state.queue.front() {
                    None => Head::Empty,
                    Some(PacerItem::Message(_)) => Head::Message,
                    Some(PacerItem::Audio(_)) => Head::Audio,
                };
                match head {
                    Head::Empty => Step::Idle,
                    Head::Message => match state.queue.pop_front() {
                        Some(PacerItem::Message(callback)) => Step::Run(callback),
                        _ => Step::Idle,
                    },
                    Head::Audio => {
                        let now = Instant::now();
                        let started = *state.started_at.get_or_insert(now);
                        let elapsed = now.saturating_duration_since(started);
                        let target = Duration::from_millis(state.play_position_ms);
                        if elapsed < target {
                            Step::Wait(target - elapsed)
                        } else {
                            match state.queue.pop_front() {
                                Some(PacerItem::Audio(packet)) => {
                                    state.play_position_ms +=
                                        self.frame_duration.as_millis() as u64;
                                    Step::Send(packet)
                                }
                                _ => Step::Idle,
                            }
                        }
                    }
                }
            };

            match step {
                Step::Idle => {
                    tokio::select! {
                        _ = self.data_notify.notified() => {}
                        _ = self.reset_notify.notified() => {}
                    }
                }
                Step::Run(callback) => callback(),
                Step::Wait(duration) => {
                    tokio::select! {
                        _ = sleep(duration) => {}
                        _ = self.reset_notify.notified() => {}
                    }
                }
                Step::Send(packet) => send(packet),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    fn start(
        frame_ms: u64,
    ) -> (
        Arc<AudioPacer>,
        mpsc::UnboundedReceiver<(Vec<u8>, Instant)>,
    ) {
        let pacer = AudioPacer::new(frame_ms);
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Arc::clone(&pacer);
        tokio::spawn(runner.run(move |packet| {
            let _ = tx.send((packet, Instant::now()));
        }));
        (pacer, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_packets_paced_at_frame_duration() {
        let (pacer, mut rx) = start(60);
        let began = Instant::now();

        for i in 0..4u8 {
            pacer.enqueue_audio(vec![i]);
        }

        let mut sent = Vec::new();
        for _ in 0..4 {
            sent.push(rx.recv().await.unwrap());
        }

        let total = sent.last().unwrap().1 - began;
        assert!(total >= Duration::from_millis(180), "total was {total:?}");
        assert_eq!(
            sent.iter().map(|(p, _)| p[0]).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_runs_before_later_audio() {
        let (pacer, mut rx) = start(60);
        let order = Arc::new(Mutex::new(Vec::new()));

        pacer.enqueue_audio(vec![1]);
        let seen = Arc::clone(&order);
        pacer.enqueue_message(Box::new(move || seen.lock().push("callback")));
        pacer.enqueue_audio(vec![2]);

        let first = rx.recv().await.unwrap().0;
        assert_eq!(first, vec![1]);
        let second = rx.recv().await.unwrap().0;
        assert_eq!(second, vec![2]);
        // callback ran between the two packets
        assert_eq!(order.lock().as_slice(), &["callback"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_pending_audio() {
        let (pacer, mut rx) = start(60);

        for i in 0..10u8 {
            pacer.enqueue_audio(vec![i]);
        }
        // first packet goes out immediately
        let first = rx.recv().await.unwrap().0;
        assert_eq!(first, vec![0]);

        pacer.reset();
        assert_eq!(pacer.queued_len(), 0);

        // a fresh segment starts pacing from zero: its first packet is
        // emitted without waiting out the old schedule
        pacer.enqueue_audio(vec![42]);
        let next = rx.recv().await.unwrap().0;
        assert_eq!(next, vec![42]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let (pacer, mut rx) = start(60);
        pacer.shutdown();
        pacer.enqueue_audio(vec![1]);
        // nothing is delivered after shutdown
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_does_not_stop_loop() {
        let pacer = AudioPacer::new(10);
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let runner = Arc::clone(&pacer);
        tokio::spawn(runner.run(move |_packet| {
            // emulate a transport error on every send; the loop keeps going
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for i in 0..3u8 {
            pacer.enqueue_audio(vec![i]);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
