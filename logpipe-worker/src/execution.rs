//! Command execution
//!
//! Runs a local command as a job: stdout and stderr are streamed into the
//! job's log writer, and the process is killed when the job goes silent,
//! exceeds its hard limit, overflows its log, or is cancelled.

use anyhow::{Context, Result};
use logpipe_core::domain::job::FinishState;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::service::LogWriter;

const READ_BUFFER_SIZE: usize = 8192;

const HARD_LIMIT_NOTICE: &str =
    "\n\nThe job exceeded the maximum time limit for jobs, and has been terminated.\n\n";

/// Runs `command` for `job` and returns how the job finished
///
/// The log writer is always closed before returning, so the job's final
/// part is emitted even on timeout or cancellation.
pub async fn run_command(
    job: &dyn Job,
    command: &[String],
    ctx: CancellationToken,
) -> Result<FinishState> {
    let job_id = job.payload().job.id;
    let (program, args) = command
        .split_first()
        .context("No command given for the job")?;

    let mut writer = job
        .log_writer(&ctx)
        .context("Failed to create log writer")?;

    info!("Starting job {}: {}", job_id, command.join(" "));

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to start job {}: {}", job_id, e);
            let message = format!("\nFailed to start {}: {}\n", program, e);
            if let Err(e) = writer.write_and_close(message.as_bytes()).await {
                warn!("Failed to write log for job {}: {}", job_id, e);
            }
            return Ok(FinishState::Errored);
        }
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_output(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_output(stderr, tx.clone()));
    }
    drop(tx);

    let mut stalled = writer.timeout();
    let hard_limit = time::sleep(job.hard_timeout());
    tokio::pin!(hard_limit);

    let interrupted = loop {
        tokio::select! {
            chunk = rx.recv() => {
                let Some(bytes) = chunk else {
                    break None;
                };
                match writer.write(&bytes).await {
                    Ok(_) if writer.is_truncated() => break Some(FinishState::Errored),
                    Ok(_) => {}
                    Err(e) if e.is_cancelled() => break Some(FinishState::Cancelled),
                    Err(e) => {
                        error!("Failed to write log for job {}: {}", job_id, e);
                        break Some(FinishState::Errored);
                    }
                }
            }
            _ = wait_until_set(&mut stalled) => {
                warn!("Job {} produced no output in time, terminating", job_id);
                let notice = silence_notice(job.log_silence_timeout());
                write_notice(&mut *writer, job_id, &notice).await;
                break Some(FinishState::Errored);
            }
            _ = &mut hard_limit => {
                warn!("Job {} exceeded its hard limit, terminating", job_id);
                write_notice(&mut *writer, job_id, HARD_LIMIT_NOTICE).await;
                break Some(FinishState::Errored);
            }
            _ = ctx.cancelled() => {
                info!("Job {} cancelled", job_id);
                break Some(FinishState::Cancelled);
            }
        }
    };

    let state = match interrupted {
        Some(state) => {
            terminate(&mut child, job_id).await;
            state
        }
        // Output is closed, but the process may still be running.
        None => tokio::select! {
            status = child.wait() => {
                let code = status
                    .context("Failed to wait for job process")?
                    .code()
                    .unwrap_or(-1);
                let summary = format!("\nDone. Your build exited with {}.\n", code);
                write_notice(&mut *writer, job_id, &summary).await;
                FinishState::from_exit_code(code)
            }
            _ = &mut hard_limit => {
                write_notice(&mut *writer, job_id, HARD_LIMIT_NOTICE).await;
                terminate(&mut child, job_id).await;
                FinishState::Errored
            }
            _ = ctx.cancelled() => {
                terminate(&mut child, job_id).await;
                FinishState::Cancelled
            }
        },
    };

    for reader in readers {
        reader.abort();
    }

    if let Err(e) = writer.close().await {
        error!("Failed to close log for job {}: {}", job_id, e);
    }
    if let Some(e) = writer.delivery_error() {
        warn!("Log for job {} has undelivered parts: {}", job_id, e);
    }

    info!("Job {} finished: {}", job_id, state);
    Ok(state)
}

/// Pumps a child's output stream into the channel until EOF
fn forward_output<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read job output: {}", e);
                    break;
                }
            }
        }
    })
}

async fn wait_until_set(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn write_notice(writer: &mut dyn LogWriter, job_id: u64, notice: &str) {
    if let Err(e) = writer.write(notice.as_bytes()).await {
        debug!("Could not append notice to log of job {}: {}", job_id, e);
    }
}

async fn terminate(child: &mut Child, job_id: u64) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill process of job {}: {}", job_id, e);
    }
}

fn silence_notice(silence: Duration) -> String {
    let secs = silence.as_secs();
    format!(
        "\n\nNo output has been received in the last {}m{}s, this potentially indicates a stalled build or something wrong with the build itself.\n\nThe build has been terminated\n\n",
        secs / 60,
        secs % 60
    )
}
