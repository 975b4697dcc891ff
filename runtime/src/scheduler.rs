//! Scheduler Module (spec §4.4): cron/interval/at/delay/preset jobs with a
//! single ticking goroutine, backed by the `cron` crate (not in the
//! teacher's own dependency tree; pulled in because nothing in the pack
//! implements calendar scheduling and this is 14% of THE CORE).
//!
//! Jobs never execute on the scheduler's own task — they're submitted to
//! the instance's `DispatcherHandle`, matching spec §4.4 "NOT executed on
//! the scheduler goroutine".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use log::warn;
use m3m_types::error::RuntimeError;
use m3m_types::job::{JobId, JobKind, JobSnapshot, JobStatus};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::degradation::DegradationCounters;
use crate::dispatcher::{DispatcherHandle, Invocation};

const DEFAULT_JOB_DEADLINE: StdDuration = StdDuration::from_secs(60);
const DEFAULT_ADMISSION_TIMEOUT: StdDuration = StdDuration::from_secs(2);
const TICK_INTERVAL: StdDuration = StdDuration::from_millis(500);

enum Spec {
    Cron(Schedule),
    /// Calendar-unaligned fixed period, for `every("<N><unit>")`.
    Interval(StdDuration),
    /// Fires once then is auto-cancelled, for `delay(ms, fn)`.
    Once,
}

struct JobEntry {
    kind: JobKind,
    expression: String,
    handler: usize,
    status: JobStatus,
    spec: Spec,
    next_run: Option<DateTime<Local>>,
    last_run: Option<i64>,
    exec_count: u64,
    last_error: Option<String>,
}

impl JobEntry {
    fn snapshot(&self, id: &JobId) -> JobSnapshot {
        JobSnapshot {
            id: id.clone(),
            kind: self.kind,
            expression: self.expression.clone(),
            status: self.status,
            next_run: self.next_run.map(|t| t.timestamp_millis()),
            last_run: self.last_run,
            exec_count: self.exec_count,
            last_error: self.last_error.clone(),
        }
    }

    fn compute_next(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        match &self.spec {
            Spec::Cron(sched) => sched.after(&after).next(),
            Spec::Interval(dur) => chrono::Duration::from_std(*dur).ok().map(|d| after + d),
            Spec::Once => None,
        }
    }
}

struct SchedulerState {
    jobs: HashMap<JobId, JobEntry>,
}

pub struct Scheduler {
    state: AsyncMutex<SchedulerState>,
    dispatcher: DispatcherHandle,
    degradation: Arc<DegradationCounters>,
    next_id: AtomicU64,
    job_deadline: StdDuration,
    admission_timeout: StdDuration,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(dispatcher: DispatcherHandle, degradation: Arc<DegradationCounters>) -> Arc<Self> {
        Arc::new(Scheduler {
            state: AsyncMutex::new(SchedulerState { jobs: HashMap::new() }),
            dispatcher,
            degradation,
            next_id: AtomicU64::new(1),
            job_deadline: DEFAULT_JOB_DEADLINE,
            admission_timeout: DEFAULT_ADMISSION_TIMEOUT,
            ticker: std::sync::Mutex::new(None),
        })
    }

    fn alloc_id(&self) -> JobId {
        format!("job-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Starts the single ticking task (spec §5: "ticking loop is a single
    /// goroutine"). Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.ticker.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let this = self.clone();
        *guard = Some(tokio::spawn(async move { this.tick_loop().await }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle.abort();
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            interval.tick().await;
            self.tick_once().await;
        }
    }

    async fn tick_once(&self) {
        let now = Local::now();
        let due: Vec<(JobId, usize, JobKind)> = {
            let state = self.state.lock().await;
            state
                .jobs
                .iter()
                .filter(|(_, j)| j.status == JobStatus::Active)
                .filter(|(_, j)| j.next_run.map(|t| t <= now).unwrap_or(false))
                .map(|(id, j)| (id.clone(), j.handler, j.kind))
                .collect()
        };

        for (id, handler, _kind) in due {
            self.fire(id).await;
            let _ = handler; // handler id is resolved again inside fire() under lock
        }
    }

    async fn fire(&self, id: JobId) {
        let deadline = self.job_deadline;
        let admission_timeout = self.admission_timeout;
        let handler = {
            let state = self.state.lock().await;
            match state.jobs.get(&id) {
                Some(j) if j.status == JobStatus::Active => j.handler,
                _ => return,
            }
        };

        let result = self
            .dispatcher
            .try_dispatch_within(Invocation::Job { handler }, deadline, admission_timeout)
            .await;

        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else { return };
        let now_ms = Local::now().timestamp_millis();

        match result {
            Ok(_) => {
                job.exec_count += 1;
                job.last_run = Some(now_ms);
                job.last_error = None;
            }
            Err(RuntimeError::QueueFull) => {
                warn!("scheduler: job {id} dropped, queue full");
                job.last_error = Some("queue full".into());
                self.degradation.record_queue_full();
                // exec_count intentionally NOT incremented (spec §4.4).
            }
            Err(e) => {
                job.last_run = Some(now_ms);
                job.exec_count += 1;
                job.last_error = Some(e.to_string());
            }
        }

        if matches!(job.spec, Spec::Once) {
            job.status = JobStatus::Cancelled;
            job.next_run = None;
        } else {
            job.next_run = job.compute_next(Local::now());
        }
    }

    pub async fn cron(&self, expression: &str, handler: usize) -> Result<JobId, RuntimeError> {
        let full = format!("0 {expression}");
        let schedule = Schedule::try_from(full.as_str())
            .map_err(|e| RuntimeError::InvalidExpression(e.to_string()))?;
        self.insert(JobKind::Cron, expression.to_string(), handler, Spec::Cron(schedule)).await
    }

    pub async fn every(&self, expression: &str, handler: usize) -> Result<JobId, RuntimeError> {
        let dur = parse_every(expression).ok_or_else(|| RuntimeError::InvalidExpression(expression.into()))?;
        self.insert(JobKind::Interval, expression.to_string(), handler, Spec::Interval(dur)).await
    }

    pub async fn at(&self, hh_mm: &str, handler: usize) -> Result<JobId, RuntimeError> {
        let (h, m) = parse_hh_mm(hh_mm).ok_or_else(|| RuntimeError::InvalidExpression(hh_mm.into()))?;
        self.cron(&format!("{m} {h} * * *"), handler).await
    }

    pub async fn delay(&self, ms: u64, handler: usize) -> Result<JobId, RuntimeError> {
        let id = self.alloc_id();
        let next_run = Local::now() + chrono::Duration::milliseconds(ms as i64);
        let mut state = self.state.lock().await;
        state.jobs.insert(
            id.clone(),
            JobEntry {
                kind: JobKind::Delay,
                expression: format!("{ms}ms"),
                handler,
                status: JobStatus::Active,
                spec: Spec::Once,
                next_run: Some(next_run),
                last_run: None,
                exec_count: 0,
                last_error: None,
            },
        );
        Ok(id)
    }

    pub async fn daily(&self, handler: usize) -> Result<JobId, RuntimeError> {
        self.cron("0 0 * * *", handler).await
    }

    pub async fn hourly(&self, handler: usize) -> Result<JobId, RuntimeError> {
        self.cron("0 * * * *", handler).await
    }

    pub async fn weekly(&self, dow: u8, handler: usize) -> Result<JobId, RuntimeError> {
        if dow > 6 {
            return Err(RuntimeError::InvalidExpression(format!("day-of-week {dow} out of range")));
        }
        self.cron(&format!("0 0 * * {dow}"), handler).await
    }

    pub async fn monthly(&self, day: u8, handler: usize) -> Result<JobId, RuntimeError> {
        if !(1..=31).contains(&day) {
            return Err(RuntimeError::InvalidExpression(format!("day-of-month {day} out of range")));
        }
        self.cron(&format!("0 0 {day} * *"), handler).await
    }

    async fn insert(&self, kind: JobKind, expression: String, handler: usize, spec: Spec) -> Result<JobId, RuntimeError> {
        let id = self.alloc_id();
        let next_run = match &spec {
            Spec::Cron(s) => s.after(&Local::now()).next(),
            Spec::Interval(d) => chrono::Duration::from_std(*d).ok().map(|d| Local::now() + d),
            Spec::Once => None,
        };
        let mut state = self.state.lock().await;
        state.jobs.insert(
            id.clone(),
            JobEntry { kind, expression, handler, status: JobStatus::Active, spec, next_run, last_run: None, exec_count: 0, last_error: None },
        );
        Ok(id)
    }

    pub async fn cancel(&self, id: &str) -> bool {
        self.state.lock().await.jobs.remove(id).is_some()
    }

    pub async fn pause(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(id) {
            job.status = JobStatus::Paused;
            job.next_run = None;
            true
        } else {
            false
        }
    }

    pub async fn resume(&self, id: &str) -> bool {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(id) {
            if job.status == JobStatus::Paused {
                job.status = JobStatus::Active;
                job.next_run = job.compute_next(Local::now());
            }
            true
        } else {
            false
        }
    }

    pub async fn list(&self) -> Vec<JobSnapshot> {
        self.state.lock().await.jobs.iter().map(|(id, j)| j.snapshot(id)).collect()
    }

    pub async fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.state.lock().await.jobs.get(id).map(|j| j.snapshot(&id.to_string()))
    }

    /// Cancels every job (spec §4.4 "On Stop, all jobs are cancelled").
    pub async fn cancel_all(&self) {
        self.state.lock().await.jobs.clear();
    }
}

fn parse_every(expr: &str) -> Option<StdDuration> {
    let (digits, unit) = expr.split_at(expr.len().checked_sub(1)?);
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return None,
    };
    Some(StdDuration::from_secs(secs))
}

fn parse_hh_mm(s: &str) -> Option<(u8, u8)> {
    let (h, m) = s.split_once(':')?;
    let h: u8 = h.parse().ok()?;
    let m: u8 = m.parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some((h, m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_unit_parsing() {
        assert_eq!(parse_every("30s"), Some(StdDuration::from_secs(30)));
        assert_eq!(parse_every("5m"), Some(StdDuration::from_secs(300)));
        assert_eq!(parse_every("2h"), Some(StdDuration::from_secs(7200)));
        assert_eq!(parse_every("1d"), Some(StdDuration::from_secs(86400)));
        assert_eq!(parse_every("1x"), None);
        assert_eq!(parse_every(""), None);
    }

    #[test]
    fn hh_mm_parsing() {
        assert_eq!(parse_hh_mm("14:30"), Some((14, 30)));
        assert_eq!(parse_hh_mm("24:00"), None);
        assert_eq!(parse_hh_mm("bad"), None);
    }

    #[tokio::test]
    async fn cancel_on_absent_job_is_a_noop() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let dispatcher = DispatcherHandle::new(tx);
        let scheduler = Scheduler::new(dispatcher, Arc::new(DegradationCounters::default()));
        assert!(!scheduler.cancel("does-not-exist").await);
    }

    #[tokio::test]
    async fn pause_then_resume_recomputes_next_run() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let dispatcher = DispatcherHandle::new(tx);
        let scheduler = Scheduler::new(dispatcher, Arc::new(DegradationCounters::default()));
        let id = scheduler.every("1h", 0).await.unwrap();
        assert!(scheduler.pause(&id).await);
        assert!(scheduler.get(&id).await.unwrap().next_run.is_none());
        assert!(scheduler.resume(&id).await);
        assert!(scheduler.get(&id).await.unwrap().next_run.is_some());
    }
}
