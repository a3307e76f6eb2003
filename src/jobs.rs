use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::future::Future;
use std::io::ErrorKind;

use chrono::{DateTime, Local, TimeDelta};
use futures::stream::FuturesUnordered;
use tracing::Instrument;
use tokio::task::JoinHandle;
use tokio::io::AsyncWriteExt;
use tokio::fs::File;
use serde::{Serialize, Deserialize};

use crate::config;
use crate::state::ArcShared;
use crate::error::{self, Context};

pub mod sweep;

/// bookkeeping kept next to the other data files so a restart knows when a
/// job last completed
#[derive(Debug, Default, Serialize, Deserialize)]
struct JobInfo {
    last_run: Option<DateTime<Local>>
}

impl JobInfo {
    fn load(job_file: &Path) -> error::Result<Self> {
        let result = std::fs::OpenOptions::new()
            .read(true)
            .open(job_file);

        match result {
            Ok(file) => serde_json::from_reader(&file)
                .context("failed to read job file"),
            Err(err) => match err.kind() {
                ErrorKind::NotFound => Ok(JobInfo::default()),
                _ => Err(err.into()),
            }
        }
    }

    async fn save(&self, job_file: &Path) -> error::Result<()> {
        let json_buffer = serde_json::to_vec(self)
            .context("failed to create json job info")?;

        let mut file = File::options()
            .write(true)
            .create(true)
            .truncate(true)
            .open(job_file)
            .await
            .context("failed to open job file")?;

        file.write_all(&json_buffer)
            .await
            .context("failed to write job info to file")?;

        Ok(())
    }
}

struct Job<F> {
    state: ArcShared,
    info: JobInfo,
    file: PathBuf,
    runner: F,
}

impl<F, T> Job<F>
where
    T: Future<Output = error::Result<()>>,
    F: Fn(ArcShared) -> T,
{
    /// a failed run is logged and leaves `last_run` untouched so the next
    /// start up catches it
    async fn run_once(&mut self) -> error::Result<()> {
        if let Err(err) = (self.runner)(Arc::clone(&self.state)).await {
            tracing::error!("job failed with error: {err}");

            return Ok(());
        }

        let local_now = Local::now();

        tracing::debug!("job finished {local_now}");

        self.info.last_run = Some(local_now);
        self.info.save(&self.file).await
    }
}

// sec  min   hour    day of month   month   day of week   year
// 0    30    9,12,15     1,15       May-Aug  Mon,Wed,Fri  2018/2

async fn job_task<F, T>(
    mut job: Job<F>,
    mut upcoming: cron::OwnedScheduleIterator<Local>,
) -> error::Result<()>
where
    T: Future<Output = error::Result<()>>,
    F: Fn(ArcShared) -> T,
{
    let zero_delta = TimeDelta::zero();

    if job.info.last_run.is_none() {
        tracing::info!("job has never run. running job");

        job.run_once().await?;
    } else {
        let Some(current) = upcoming.next() else {
            tracing::info!("job finished");

            return Ok(());
        };

        if current - Local::now() < zero_delta {
            tracing::info!("missed previous job. running job");

            job.run_once().await?;
        } else {
            tracing::debug!("moving upcoming iterator back one");

            upcoming.next_back();
        }
    }

    while let Some(next) = upcoming.next() {
        let delta = next - Local::now();

        if delta < zero_delta {
            continue;
        }

        tracing::debug!("waiting for {delta}");

        tokio::time::sleep(delta.to_std().unwrap_or_default()).await;

        tracing::info!("running job");

        job.run_once().await?;
    }

    tracing::info!("job finished");

    Ok(())
}

fn get_jobs_dir(data: PathBuf) -> error::Result<PathBuf> {
    let jobs_dir = data.join("jobs");

    let metadata = match jobs_dir.metadata() {
        Ok(m) => m,
        Err(err) => match err.kind() {
            ErrorKind::NotFound => {
                std::fs::create_dir(&jobs_dir)?;

                return Ok(jobs_dir);
            },
            _ => {
                return Err(err.into());
            }
        }
    };

    if !metadata.is_dir() {
        Err(error::Error::new()
            .context("jobs data directory is not a directory"))
    } else {
        Ok(jobs_dir)
    }
}

fn spawn_job<F, T>(
    jobs_dir: &Path,
    state: &ArcShared,
    name: &'static str,
    crontab: &str,
    runner: F
) -> error::Result<JoinHandle<()>>
where
    T: Future<Output = error::Result<()>> + Send,
    F: Fn(ArcShared) -> T + Send + 'static,
{
    let file = jobs_dir.join(format!("{name}.json"));
    let info = JobInfo::load(&file)?;

    let schedule = cron::Schedule::from_str(crontab)
        .context(format!("failed to parse crontab for {name}"))?;

    let upcoming = if let Some(last_run) = info.last_run {
        schedule.after_owned(last_run)
    } else {
        schedule.upcoming_owned(Local)
    };

    let job = Job {
        state: Arc::clone(state),
        info,
        file,
        runner,
    };

    Ok(tokio::spawn(async move {
        let job_span = tracing::span!(
            tracing::Level::INFO,
            "job",
            name = name
        );

        let result = job_task(job, upcoming)
            .instrument(job_span)
            .await;

        if let Err(err) = result {
            tracing::error!("job {name} failed with error {err}");
        }
    }))
}

pub fn background(
    state: &ArcShared,
    data: PathBuf,
    sweep: &config::Sweep
) -> error::Result<FuturesUnordered<JoinHandle<()>>> {
    let jobs_dir = get_jobs_dir(data)?;
    let waiter = FuturesUnordered::new();
    let batch = sweep.batch;

    waiter.push(spawn_job(&jobs_dir, state, "size_sweep", &sweep.crontab, move |state| {
        sweep::run(state, batch)
    })?);

    Ok(waiter)
}
