//! Terminal view models for each dashboard page.

use std::rc::Rc;

use beacon_core::{
    Artifact, Clock, ClockSkew, JobCompleted, JobQueued, JobStarted, Query, Reaction, Route, RunNumber,
    RunRef, RunResult, Status, StatusDelivery, View, ViewEffect, ViewFactory,
};
use beacon_logging::beacon_warn;
use serde::Deserialize;

use crate::progress;
use crate::screen::Screen;

/// One run as listed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSummary {
    pub name: String,
    pub number: u32,
    pub result: RunResult,
    pub started: Option<i64>,
    pub completed: Option<i64>,
    pub etc: Option<i64>,
}

impl RunSummary {
    fn from_queued(job: &JobQueued) -> Self {
        Self {
            name: job.name.clone(),
            number: job.number.unwrap_or_default(),
            result: RunResult::Queued,
            ..Self::default()
        }
    }

    fn from_started(job: &JobStarted) -> Self {
        Self {
            name: job.name.clone(),
            number: job.number,
            result: RunResult::Running,
            started: Some(job.started),
            etc: job.etc,
            ..Self::default()
        }
    }

    fn from_completed(job: &JobCompleted) -> Self {
        Self {
            name: job.name.clone(),
            number: job.number,
            result: job.result,
            started: Some(job.started),
            completed: Some(job.completed),
            etc: None,
        }
    }

    fn describe(&self, now: i64) -> String {
        format!(
            "{} #{} {}",
            self.name,
            self.number,
            run_state(self.result, self.started, self.completed, self.etc, now)
        )
    }
}

fn run_state(
    result: RunResult,
    started: Option<i64>,
    completed: Option<i64>,
    etc: Option<i64>,
    now: i64,
) -> String {
    match (result, started, completed) {
        (RunResult::Running, Some(started), _) => progress::describe(started, etc, now),
        (result, Some(started), Some(completed)) => {
            format!("{} in {}s", result.as_str(), completed - started)
        }
        (result, ..) => result.as_str().to_string(),
    }
}

/// Server-clock "now" for progress estimates.
fn server_now(clock: &Rc<dyn Clock>, skew: &ClockSkew) -> i64 {
    skew.server_now(clock.unix_now())
}

fn payload<T: Default + for<'de> Deserialize<'de>>(status: &Status, page: &str) -> T {
    status.payload().unwrap_or_else(|err| {
        beacon_warn!("{} status payload not understood: {}", page, err);
        T::default()
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct HomeStatus {
    queued: Vec<RunSummary>,
    running: Vec<RunSummary>,
    recent: Vec<RunSummary>,
    executors_busy: u32,
    executors_total: u32,
}

/// `/`: queue, running and recent runs plus executor use.
pub struct HomeView {
    screen: Screen,
    clock: Rc<dyn Clock>,
    skew: ClockSkew,
    state: HomeStatus,
}

impl HomeView {
    pub fn new(screen: Screen, clock: Rc<dyn Clock>, skew: ClockSkew) -> Self {
        Self {
            screen,
            clock,
            skew,
            state: HomeStatus::default(),
        }
    }

    fn render(&self) {
        let now = server_now(&self.clock, &self.skew);
        self.screen.line(format!(
            "executors {}/{} | queued {} | running {}",
            self.state.executors_busy,
            self.state.executors_total,
            self.state.queued.len(),
            self.state.running.len()
        ));
        for run in &self.state.running {
            self.screen.line(format!("  {}", run.describe(now)));
        }
    }
}

impl View for HomeView {
    fn status(&mut self, status: &Status, _delivery: StatusDelivery) -> Vec<ViewEffect> {
        self.state = payload(status, "home");
        self.render();
        Vec::new()
    }

    fn job_queued(&mut self, job: &JobQueued) -> Reaction {
        self.state.queued.insert(0, RunSummary::from_queued(job));
        self.render();
        Reaction::handled()
    }

    fn job_started(&mut self, job: &JobStarted) -> Reaction {
        // The queue is listed newest first.
        let len = self.state.queued.len();
        if let Some(index) = job
            .queue_position()
            .and_then(|position| len.checked_sub(position + 1))
        {
            self.state.queued.remove(index);
        }
        self.state.running.insert(0, RunSummary::from_started(job));
        self.state.executors_busy += 1;
        self.render();
        Reaction::handled()
    }

    fn job_completed(&mut self, job: &JobCompleted) -> Reaction {
        if let Some(index) = self
            .state
            .running
            .iter()
            .position(|run| run.name == job.name && run.number == job.number)
        {
            self.state.running.remove(index);
            self.state.recent.insert(0, RunSummary::from_completed(job));
            self.state.executors_busy = self.state.executors_busy.saturating_sub(1);
        }
        self.render();
        Reaction::handled()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
struct AllJobsStatus {
    jobs: Vec<RunSummary>,
    running: Vec<RunSummary>,
}

/// `/jobs` and `/wallboard`: the latest run of every job.
pub struct AllJobsView {
    screen: Screen,
    clock: Rc<dyn Clock>,
    skew: ClockSkew,
    wallboard: bool,
    jobs: Vec<RunSummary>,
    running: Vec<RunSummary>,
}

impl AllJobsView {
    pub fn new(screen: Screen, clock: Rc<dyn Clock>, skew: ClockSkew, wallboard: bool) -> Self {
        Self {
            screen,
            clock,
            skew,
            wallboard,
            jobs: Vec::new(),
            running: Vec::new(),
        }
    }

    fn upsert_job(&mut self, run: RunSummary) {
        match self.jobs.iter().position(|job| job.name == run.name) {
            Some(index) => self.jobs[index] = run,
            None => {
                self.jobs.push(run);
                self.jobs.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }

    fn render(&self) {
        let now = server_now(&self.clock, &self.skew);
        let heading = if self.wallboard { "wallboard" } else { "jobs" };
        self.screen.line(format!("{heading}: {} jobs", self.jobs.len()));
        for job in &self.jobs {
            self.screen.line(format!("  {}", job.describe(now)));
        }
    }
}

impl View for AllJobsView {
    fn status(&mut self, status: &Status, _delivery: StatusDelivery) -> Vec<ViewEffect> {
        let AllJobsStatus { jobs, running } = payload(status, "jobs");
        self.jobs = jobs;
        self.running = Vec::new();
        for run in running {
            self.upsert_job(run.clone());
            self.running.push(run);
        }
        self.render();
        Vec::new()
    }

    fn job_started(&mut self, job: &JobStarted) -> Reaction {
        let run = RunSummary::from_started(job);
        match self.running.iter().position(|r| r.name == run.name) {
            Some(index) => self.running[index] = run.clone(),
            None => self.running.insert(0, run.clone()),
        }
        self.upsert_job(run);
        self.render();
        Reaction::handled()
    }

    fn job_completed(&mut self, job: &JobCompleted) -> Reaction {
        let run = RunSummary::from_completed(job);
        if let Some(index) = self.jobs.iter().position(|r| r.name == run.name) {
            self.jobs[index] = run;
        }
        self.running.retain(|r| r.name != job.name);
        self.render();
        Reaction::handled()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JobStatus {
    description: Option<String>,
    running: Vec<RunSummary>,
    recent: Vec<RunSummary>,
    last_success: Option<RunSummary>,
    last_failed: Option<RunSummary>,
    n_queued: u32,
    pages: u32,
    sort: Query,
}

/// `/jobs/<name>`: one job's runs, paginated and sortable.
pub struct JobView {
    name: String,
    screen: Screen,
    clock: Rc<dyn Clock>,
    skew: ClockSkew,
    state: JobStatus,
}

impl JobView {
    pub fn new(name: impl Into<String>, screen: Screen, clock: Rc<dyn Clock>, skew: ClockSkew) -> Self {
        Self {
            name: name.into(),
            screen,
            clock,
            skew,
            state: JobStatus::default(),
        }
    }

    fn render(&self) {
        let now = server_now(&self.clock, &self.skew);
        let sort = &self.state.sort;
        self.screen.line(format!(
            "{}: {} queued | page {}/{} by {} {}",
            self.name,
            self.state.n_queued,
            sort.page + 1,
            self.state.pages.max(1),
            sort.field,
            sort.order.as_str()
        ));
        if let Some(description) = &self.state.description {
            self.screen.line(format!("  {description}"));
        }
        for run in self.state.running.iter().chain(&self.state.recent) {
            self.screen.line(format!("  {}", run.describe(now)));
        }
        let last = |label: &str, run: &Option<RunSummary>| {
            if let Some(run) = run {
                self.screen.line(format!("  last {label}: #{}", run.number));
            }
        };
        last("success", &self.state.last_success);
        last("failure", &self.state.last_failed);
    }

    fn requery(&self, query: Query) -> Reaction {
        Reaction::Handled(vec![ViewEffect::Requery(query)])
    }
}

impl View for JobView {
    fn status(&mut self, status: &Status, _delivery: StatusDelivery) -> Vec<ViewEffect> {
        self.state = payload(status, "job");
        self.render();
        Vec::new()
    }

    fn job_queued(&mut self, _job: &JobQueued) -> Reaction {
        self.state.n_queued += 1;
        self.render();
        Reaction::handled()
    }

    fn job_started(&mut self, job: &JobStarted) -> Reaction {
        self.state.n_queued = self.state.n_queued.saturating_sub(1);
        self.state.running.insert(0, RunSummary::from_started(job));
        self.render();
        Reaction::handled()
    }

    fn job_completed(&mut self, job: &JobCompleted) -> Reaction {
        if let Some(index) = self
            .state
            .running
            .iter()
            .position(|run| run.number == job.number)
        {
            self.state.running.remove(index);
            self.state.recent.insert(0, RunSummary::from_completed(job));
            self.render();
        }
        Reaction::handled()
    }

    fn input(&mut self, command: &str) -> Reaction {
        let mut words = command.split_whitespace();
        let sort = &self.state.sort;
        match (words.next(), words.next()) {
            (Some("next"), None) if sort.page + 1 < self.state.pages => self.requery(Query {
                page: sort.page + 1,
                ..sort.clone()
            }),
            (Some("prev"), None) if sort.page > 0 => self.requery(Query {
                page: sort.page - 1,
                ..sort.clone()
            }),
            (Some("next" | "prev"), None) => Reaction::handled(),
            (Some("sort"), Some(field)) => self.requery(sort.sorted_by(field)),
            _ => Reaction::Unhandled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RunStatus {
    result: RunResult,
    started: Option<i64>,
    completed: Option<i64>,
    etc: Option<i64>,
    reason: Option<String>,
    latest_num: Option<u32>,
    artifacts: Vec<Artifact>,
}

/// `/jobs/<name>/<number>`: one run and its console output.
pub struct RunView {
    name: String,
    number: RunNumber,
    screen: Screen,
    clock: Rc<dyn Clock>,
    skew: ClockSkew,
    run: RunStatus,
    latest: Option<u32>,
    log: String,
}

impl RunView {
    pub fn new(
        name: impl Into<String>,
        number: RunNumber,
        screen: Screen,
        clock: Rc<dyn Clock>,
        skew: ClockSkew,
    ) -> Self {
        Self {
            name: name.into(),
            number,
            screen,
            clock,
            skew,
            run: RunStatus::default(),
            latest: None,
            log: String::new(),
        }
    }

    fn is_this_run(&self, number: u32) -> bool {
        self.number == RunNumber::Number(number)
    }

    fn run_ref(&self) -> Option<RunRef> {
        match self.number {
            RunNumber::Number(number) => Some(RunRef::new(self.name.clone(), number)),
            RunNumber::Latest => None,
        }
    }

    fn render(&self) {
        let run = &self.run;
        let now = server_now(&self.clock, &self.skew);
        let state = run_state(run.result, run.started, run.completed, run.etc, now);
        self.screen
            .line(format!("{} #{}: {}", self.name, self.number, state));
        if let Some(reason) = &self.run.reason {
            self.screen.line(format!("  reason: {reason}"));
        }
        if let (Some(latest), RunNumber::Number(number)) = (self.latest, self.number) {
            if latest > number {
                self.screen.line(format!("  newer run: #{latest}"));
            }
        }
        for artifact in &self.run.artifacts {
            self.screen
                .line(format!("  artifact {} ({} bytes)", artifact.filename, artifact.size));
        }
    }
}

impl View for RunView {
    fn status(&mut self, status: &Status, delivery: StatusDelivery) -> Vec<ViewEffect> {
        let run: RunStatus = payload(status, "run");
        let Some(run_ref) = self.run_ref() else {
            return match run.latest_num {
                Some(latest) => vec![ViewEffect::Redirect(format!("/jobs/{}/{latest}", self.name))],
                None => {
                    beacon_warn!("{} has no runs yet", self.name);
                    Vec::new()
                }
            };
        };

        self.latest = run.latest_num;
        self.run = run;
        if delivery == StatusDelivery::Refresh {
            // The log session outlives a refresh.
            self.render();
            return Vec::new();
        }
        self.log.clear();
        self.render();
        if self.run.started.is_some() {
            vec![ViewEffect::OpenLog(run_ref)]
        } else {
            vec![ViewEffect::AbortLog]
        }
    }

    fn job_queued(&mut self, job: &JobQueued) -> Reaction {
        if job.number.is_some() {
            self.latest = job.number;
        }
        Reaction::handled()
    }

    fn job_started(&mut self, job: &JobStarted) -> Reaction {
        if !self.is_this_run(job.number) {
            return Reaction::handled();
        }
        self.run.result = RunResult::Running;
        self.run.started = Some(job.started);
        self.run.etc = job.etc;
        self.log.clear();
        self.render();
        match self.run_ref() {
            Some(run_ref) => Reaction::Handled(vec![ViewEffect::OpenLog(run_ref)]),
            None => Reaction::handled(),
        }
    }

    fn job_completed(&mut self, job: &JobCompleted) -> Reaction {
        if self.is_this_run(job.number) {
            self.run.result = job.result;
            self.run.completed = Some(job.completed);
            self.run.reason = job.reason.clone();
            self.run.artifacts = job.artifacts.clone();
            self.render();
        }
        Reaction::handled()
    }

    fn log_output(&mut self, markup: &str) {
        self.log.push_str(markup);
        self.screen.line(markup.trim_end_matches('\n'));
    }

    fn log_complete(&mut self) {
        self.screen
            .line(format!("-- end of {} #{} log --", self.name, self.number));
    }
}

/// Creates the view for each route.
pub struct AppViews {
    screen: Screen,
    clock: Rc<dyn Clock>,
}

impl AppViews {
    pub fn new(screen: Screen, clock: Rc<dyn Clock>) -> Self {
        Self { screen, clock }
    }
}

impl ViewFactory for AppViews {
    fn create(&mut self, route: &Route, skew: &ClockSkew) -> Box<dyn View> {
        let screen = self.screen.clone();
        let clock = self.clock.clone();
        let skew = skew.clone();
        match route {
            Route::Home => Box::new(HomeView::new(screen, clock, skew)),
            Route::Jobs => Box::new(AllJobsView::new(screen, clock, skew, false)),
            Route::Wallboard => Box::new(AllJobsView::new(screen, clock, skew, true)),
            Route::Job { name } => Box::new(JobView::new(name.clone(), screen, clock, skew)),
            Route::Run { name, number } => {
                Box::new(RunView::new(name.clone(), *number, screen, clock, skew))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::{Dashboard, Envelope, SortOrder};
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct FixedClock(i64);

    impl Clock for FixedClock {
        fn now(&self) -> std::time::Instant {
            std::time::Instant::now()
        }

        fn unix_now(&self) -> i64 {
            self.0
        }
    }

    fn clock() -> Rc<dyn Clock> {
        Rc::new(FixedClock(1_000))
    }

    fn status(data: Value) -> Status {
        match Envelope::decode(&json!({"type": "status", "time": 1_000, "data": data}).to_string()) {
            Ok(Envelope::Status(status)) => status,
            other => panic!("not a status: {other:?}"),
        }
    }

    fn started(name: &str, number: u32, queue_index: i64) -> JobStarted {
        JobStarted {
            name: name.to_string(),
            number,
            queue_index: Some(queue_index),
            queued: None,
            started: 900,
            etc: Some(1_100),
            reason: None,
        }
    }

    fn completed(name: &str, number: u32) -> JobCompleted {
        JobCompleted {
            name: name.to_string(),
            number,
            queued: None,
            started: 900,
            completed: 1_000,
            result: RunResult::Success,
            reason: None,
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn home_started_job_leaves_queue_by_index() {
        let screen = Screen::captured();
        let mut view = HomeView::new(screen.clone(), clock(), ClockSkew::default());
        view.status(
            &status(json!({
                "queued": [{"name": "c"}, {"name": "b"}, {"name": "a"}],
                "executorsTotal": 2
            })),
            StatusDelivery::Bind,
        );
        // "a" is the oldest entry, index 0 from the back.
        view.job_started(&started("a", 1, 0));
        let names: Vec<&str> = view.state.queued.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(view.state.executors_busy, 1);

        view.job_completed(&completed("a", 1));
        assert!(view.state.running.is_empty());
        assert_eq!(view.state.recent[0].result, RunResult::Success);
        assert_eq!(view.state.executors_busy, 0);
        assert_eq!(
            screen.lines().last().map(String::as_str),
            Some("executors 0/2 | queued 2 | running 0")
        );
    }

    #[test]
    fn running_job_shows_progress() {
        let screen = Screen::captured();
        let mut view = HomeView::new(screen.clone(), clock(), ClockSkew::default());
        view.status(&status(json!({})), StatusDelivery::Bind);
        view.job_started(&started("build", 4, 0));
        assert_eq!(
            screen.lines().last().map(String::as_str),
            Some("  build #4 50%")
        );
    }

    #[test]
    fn all_jobs_merges_running_and_sorts_new_jobs() {
        let mut view = AllJobsView::new(Screen::captured(), clock(), ClockSkew::default(), false);
        view.status(
            &status(json!({
                "jobs": [{"name": "b", "number": 1, "result": "success"}],
                "running": [{"name": "b", "number": 2, "result": "running", "started": 990}]
            })),
            StatusDelivery::Bind,
        );
        assert_eq!(view.jobs[0].number, 2);

        view.job_started(&started("a", 1, 0));
        let names: Vec<&str> = view.jobs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(view.running.len(), 2);

        view.job_completed(&completed("b", 2));
        assert_eq!(view.jobs[1].result, RunResult::Success);
        assert_eq!(view.running.len(), 1);
    }

    #[test]
    fn job_pagination_requeries() {
        let mut view = JobView::new("build", Screen::captured(), clock(), ClockSkew::default());
        view.status(
            &status(json!({"pages": 3, "sort": {"page": 0, "field": "number", "order": "dsc"}})),
            StatusDelivery::Bind,
        );

        assert_eq!(
            view.input("next"),
            Reaction::Handled(vec![ViewEffect::Requery(Query {
                page: 1,
                field: "number".to_string(),
                order: SortOrder::Descending,
            })])
        );
        assert_eq!(view.input("prev"), Reaction::handled());
        assert_eq!(
            view.input("sort number"),
            Reaction::Handled(vec![ViewEffect::Requery(Query {
                page: 0,
                field: "number".to_string(),
                order: SortOrder::Ascending,
            })])
        );
        assert_eq!(
            view.input("sort duration"),
            Reaction::Handled(vec![ViewEffect::Requery(Query {
                page: 0,
                field: "duration".to_string(),
                order: SortOrder::Descending,
            })])
        );
        assert_eq!(view.input("dance"), Reaction::Unhandled);
    }

    #[test]
    fn job_counts_queue_and_moves_completed_runs() {
        let mut view = JobView::new("build", Screen::captured(), clock(), ClockSkew::default());
        view.status(&status(json!({"nQueued": 1})), StatusDelivery::Bind);
        view.job_queued(&JobQueued {
            name: "build".to_string(),
            number: Some(8),
        });
        view.job_started(&started("build", 7, 0));
        assert_eq!(view.state.n_queued, 1);
        view.job_completed(&completed("build", 7));
        assert!(view.state.running.is_empty());
        assert_eq!(view.state.recent[0].number, 7);
    }

    #[test]
    fn latest_run_redirects() {
        let mut view = RunView::new("build", RunNumber::Latest, Screen::captured(), clock(), ClockSkew::default());
        let effects = view.status(&status(json!({"latestNum": 12})), StatusDelivery::Bind);
        assert_eq!(effects, vec![ViewEffect::Redirect("/jobs/build/12".to_string())]);
    }

    #[test]
    fn run_opens_log_only_once_started() {
        let mut view = RunView::new("build", RunNumber::Number(5), Screen::captured(), clock(), ClockSkew::default());
        let effects = view.status(&status(json!({"result": "queued"})), StatusDelivery::Bind);
        assert_eq!(effects, vec![ViewEffect::AbortLog]);

        let reaction = view.job_started(&started("build", 5, 0));
        assert_eq!(
            reaction,
            Reaction::Handled(vec![ViewEffect::OpenLog(RunRef::new("build", 5))])
        );
        assert_eq!(view.job_started(&started("build", 6, 0)), Reaction::handled());

        let effects = view.status(
            &status(json!({"result": "running", "started": 950, "latestNum": 6})),
            StatusDelivery::Bind,
        );
        assert_eq!(effects, vec![ViewEffect::OpenLog(RunRef::new("build", 5))]);
    }

    #[test]
    fn refresh_keeps_the_log_session() {
        let mut view = RunView::new(
            "build",
            RunNumber::Number(5),
            Screen::captured(),
            clock(),
            ClockSkew::default(),
        );
        view.status(&status(json!({"result": "running", "started": 950})), StatusDelivery::Bind);
        view.log_output("step 1\n");

        let effects = view.status(
            &status(json!({"result": "running", "started": 950, "etc": 1_100})),
            StatusDelivery::Refresh,
        );
        assert_eq!(effects, Vec::new());
        assert_eq!(view.log, "step 1\n");
        assert_eq!(view.run.etc, Some(1_100));
    }

    #[test]
    fn progress_uses_the_shared_skew() {
        let screen = Screen::captured();
        let mut dashboard = Dashboard::default();
        let mut view = HomeView::new(screen.clone(), clock(), dashboard.clock_skew.clone());
        // Server is 100s ahead of the local clock.
        dashboard.apply_status(&status(json!({})), 900);
        view.job_started(&started("build", 4, 0));
        assert_eq!(
            screen.lines().last().map(String::as_str),
            Some("  build #4 99%")
        );
    }

    #[test]
    fn negative_queue_index_counts_from_the_oldest() {
        let mut view = HomeView::new(Screen::captured(), clock(), ClockSkew::default());
        view.status(
            &status(json!({"queued": [{"name": "c"}, {"name": "b"}, {"name": "a"}]})),
            StatusDelivery::Bind,
        );
        view.job_started(&started("b", 2, -1));
        let names: Vec<&str> = view.state.queued.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn run_log_appends() {
        let screen = Screen::captured();
        let mut view = RunView::new("build", RunNumber::Number(5), screen.clone(), clock(), ClockSkew::default());
        view.log_output("one\n");
        view.log_output("<b>two</b>\n");
        view.log_complete();
        assert_eq!(view.log, "one\n<b>two</b>\n");
        assert_eq!(
            screen.lines(),
            vec!["one", "<b>two</b>", "-- end of build #5 log --"]
        );
    }
}
