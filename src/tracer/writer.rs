//! The two ways of serializing store writes across host threads: a mutex
//! around the store, or a single writer thread fed through a queue.

use std::{
    slice,
    sync::{Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, warn};

use crate::{
    config::{TracerConfig, WriterMode},
    error::{InitError, TraceError},
};

use super::event::{EventLog, TraceEvent};

enum Command {
    Event(TraceEvent),
    /// Answered once every event queued before it is committed
    Flush(Sender<()>),
}

pub(crate) enum Writer {
    Inline(Mutex<EventLog>),
    Background(BackgroundWriter),
}

pub(crate) struct BackgroundWriter {
    queue: Sender<Command>,
    thread: JoinHandle<Option<EventLog>>,
}

impl Writer {
    /// On failure the session in `log` is closed before returning
    pub(crate) fn start(log: EventLog, config: &TracerConfig) -> Result<Self, InitError> {
        match config.writer_mode() {
            WriterMode::Inline => Ok(Self::Inline(Mutex::new(log))),
            WriterMode::Background => {
                BackgroundWriter::spawn(log, config.max_batch()).map(Self::Background)
            }
        }
    }

    /// Never blocks in background mode, the queue is unbounded
    pub(crate) fn submit(&self, event: TraceEvent) -> Result<(), TraceError> {
        match self {
            Self::Inline(log) => {
                let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
                log.apply_batch(slice::from_ref(&event));
                Ok(())
            }
            Self::Background(writer) => writer
                .queue
                .send(Command::Event(event))
                .map_err(|_| TraceError::WriterGone),
        }
    }

    /// Wait until everything submitted so far has reached the store
    pub(crate) fn flush(&self) -> Result<(), TraceError> {
        match self {
            Self::Inline(_) => Ok(()),
            Self::Background(writer) => {
                let (ack, done) = channel::bounded(1);
                writer
                    .queue
                    .send(Command::Flush(ack))
                    .map_err(|_| TraceError::WriterGone)?;
                done.recv().map_err(|_| TraceError::WriterGone)
            }
        }
    }

    /// Drain outstanding events and hand the log back
    pub(crate) fn finish(self) -> Result<EventLog, TraceError> {
        match self {
            Self::Inline(log) => Ok(log.into_inner().unwrap_or_else(PoisonError::into_inner)),
            Self::Background(BackgroundWriter { queue, thread }) => {
                drop(queue);
                match thread.join() {
                    Ok(Some(log)) => Ok(log),
                    Ok(None) | Err(_) => Err(TraceError::WriterGone),
                }
            }
        }
    }
}

impl BackgroundWriter {
    fn spawn(log: EventLog, batch_limit: usize) -> Result<Self, InitError> {
        let (queue, commands) = channel::unbounded();
        // The log only moves to the thread once it exists, so a failed spawn
        // still lets us close the session
        let (handoff, handed) = channel::bounded::<EventLog>(1);
        let spawned = thread::Builder::new()
            .name("smtrace-writer".into())
            .spawn(move || {
                let log = handed.recv().ok()?;
                Some(run(log, &commands, batch_limit))
            });

        match spawned {
            Ok(thread) => {
                if let Err(channel::SendError(log)) = handoff.send(log) {
                    // cannot happen while `thread` is parked on `handed`
                    close_quietly(log);
                    return Err(InitError::WriterSpawn(std::io::Error::other(
                        "writer thread exited before start",
                    )));
                }
                Ok(Self { queue, thread })
            }
            Err(e) => {
                close_quietly(log);
                Err(InitError::WriterSpawn(e))
            }
        }
    }
}

fn close_quietly(log: EventLog) {
    if let Err(e) = log.close() {
        warn!("{e}");
    }
}

fn run(mut log: EventLog, commands: &Receiver<Command>, batch_limit: usize) -> EventLog {
    debug!("trace writer started");
    let mut batch = Vec::with_capacity(batch_limit);
    let mut acks = Vec::new();

    while let Ok(first) = commands.recv() {
        let mut next = Some(first);
        while let Some(command) = next {
            match command {
                Command::Event(event) => batch.push(event),
                Command::Flush(ack) => acks.push(ack),
            }
            next = if batch.len() < batch_limit {
                commands.try_recv().ok()
            } else {
                None
            };
        }

        log.apply_batch(&batch);
        batch.clear();
        for ack in acks.drain(..) {
            // the flusher may have given up waiting
            let _ = ack.send(());
        }
    }

    debug!("trace writer stopped");
    log
}
