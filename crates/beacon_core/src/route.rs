use std::fmt;

use serde::Deserialize;
use thiserror::Error;
use url::form_urlencoded;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("no route matches `{0}`")]
    Unmatched(String),
    #[error("invalid run number `{0}`")]
    RunNumber(String),
}

/// A dashboard page, as addressed by its path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Jobs,
    Wallboard,
    Job { name: String },
    Run { name: String, number: RunNumber },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunNumber {
    /// Resolved by the server to the most recent run of the job.
    Latest,
    Number(u32),
}

impl fmt::Display for RunNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunNumber::Latest => write!(f, "latest"),
            RunNumber::Number(n) => write!(f, "{n}"),
        }
    }
}

impl Route {
    /// Resolves a path such as `/jobs/build/12`. Leading and trailing slashes
    /// are optional; any query string must already be stripped.
    pub fn resolve(path: &str) -> Result<Self, RouteError> {
        let trimmed = path.trim_matches('/');
        let segments: Vec<&str> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split('/').collect()
        };

        match segments.as_slice() {
            [] => Ok(Route::Home),
            ["jobs"] => Ok(Route::Jobs),
            ["wallboard"] => Ok(Route::Wallboard),
            ["jobs", name] if !name.is_empty() => Ok(Route::Job {
                name: (*name).to_string(),
            }),
            ["jobs", name, number] if !name.is_empty() => Ok(Route::Run {
                name: (*name).to_string(),
                number: parse_run_number(number)?,
            }),
            _ => Err(RouteError::Unmatched(path.to_string())),
        }
    }

    /// Canonical path of this route, always starting with `/`.
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Jobs => "/jobs".to_string(),
            Route::Wallboard => "/wallboard".to_string(),
            Route::Job { name } => format!("/jobs/{name}"),
            Route::Run { name, number } => format!("/jobs/{name}/{number}"),
        }
    }

    /// Path plus optional query string, as used to open a channel.
    pub fn target(&self, query: Option<&Query>) -> String {
        match query {
            Some(query) => format!("{}?{}", self.path(), query.to_query_string()),
            None => self.path(),
        }
    }
}

fn parse_run_number(raw: &str) -> Result<RunNumber, RouteError> {
    if raw == "latest" {
        return Ok(RunNumber::Latest);
    }
    raw.parse::<u32>()
        .ok()
        .filter(|n| *n > 0)
        .map(RunNumber::Number)
        .ok_or_else(|| RouteError::RunNumber(raw.to_string()))
}

/// Identifies a single run of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunRef {
    pub job: String,
    pub number: u32,
}

impl RunRef {
    pub fn new(job: impl Into<String>, number: u32) -> Self {
        Self {
            job: job.into(),
            number,
        }
    }

    /// Relative location of the run's console output.
    pub fn log_path(&self) -> String {
        format!("log/{}/{}", self.job, self.number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum SortOrder {
    #[serde(rename = "asc")]
    Ascending,
    #[default]
    #[serde(rename = "dsc")]
    Descending,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "dsc",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Ascending => SortOrder::Descending,
            SortOrder::Descending => SortOrder::Ascending,
        }
    }
}

/// Pagination and sort parameters for paginated lists.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Query {
    pub page: u32,
    pub field: String,
    pub order: SortOrder,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            page: 0,
            field: "number".to_string(),
            order: SortOrder::Descending,
        }
    }
}

impl Query {
    pub fn to_query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("page", &self.page.to_string())
            .append_pair("field", &self.field)
            .append_pair("order", self.order.as_str())
            .finish()
    }

    /// Parses `page=..&field=..&order=..`; unknown keys and unparsable values
    /// keep their defaults.
    pub fn parse(raw: &str) -> Self {
        let mut query = Query::default();
        for (key, value) in form_urlencoded::parse(raw.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "page" => {
                    if let Ok(page) = value.parse() {
                        query.page = page;
                    }
                }
                "field" => query.field = value.into_owned(),
                "order" => {
                    query.order = if value == "asc" {
                        SortOrder::Ascending
                    } else {
                        SortOrder::Descending
                    }
                }
                _ => {}
            }
        }
        query
    }

    /// Sort by `field`; choosing the current field again flips the order.
    pub fn sorted_by(&self, field: &str) -> Self {
        let mut next = self.clone();
        if next.field == field {
            next.order = next.order.toggled();
        } else {
            next.field = field.to_string();
            next.order = SortOrder::Descending;
        }
        next
    }
}
