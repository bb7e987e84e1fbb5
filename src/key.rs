use std::fmt::Display;
use std::str::FromStr;

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::time::format_timestamp;

/// The attributes that, together with the period, group the aggregated metrics.
///
/// The order of the dimensions is fixed: user always comes before app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    user: bool,
    app: bool,
}

impl Dimensions {
    pub const USER: Dimensions = Dimensions {
        user: true,
        app: false,
    };
    pub const APP: Dimensions = Dimensions {
        user: false,
        app: true,
    };
    pub const USER_APP: Dimensions = Dimensions {
        user: true,
        app: true,
    };

    pub fn new(user: bool, app: bool) -> Result<Self> {
        if !user && !app {
            return Err(Error::EmptyDimensions);
        }
        Ok(Self { user, app })
    }

    pub fn user(&self) -> bool {
        self.user
    }

    pub fn app(&self) -> bool {
        self.app
    }

    /// Names of the key columns of an output row.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut columns = vec!["timestamp"];
        if self.user {
            columns.push("user");
        }
        if self.app {
            columns.push("app");
        }
        columns
    }

    /// Build the key of a record that belongs to the bucket starting at `period`.
    #[inline]
    pub fn key(&self, period: NaiveDateTime, user: &str, app: &str) -> AggregationKey {
        AggregationKey {
            period,
            user: self.user.then(|| user.to_string()),
            app: self.app.then(|| app.to_string()),
        }
    }
}

/// Parses a comma separated list like `user`, `app` or `user,app`, in any order.
impl FromStr for Dimensions {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (mut user, mut app) = (false, false);
        for dim in s.split(',').map(str::trim).filter(|d| !d.is_empty()) {
            match dim {
                "user" => user = true,
                "app" => app = true,
                other => return Err(Error::InvalidDimension(other.to_string())),
            }
        }
        Dimensions::new(user, app)
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.columns()[1..].join(","))
    }
}

/// Key of a bucket: the start of the period and the selected dimensions.
///
/// Keys are ordered lexicographically on `(period, user, app)`. The period is kept as a
/// timestamp: its textual form `YYYY-MM-DD HH:MM:SS` sorts the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    pub period: NaiveDateTime,
    pub user: Option<String>,
    pub app: Option<String>,
}

impl AggregationKey {
    /// The key columns of the output row, in order.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = Vec::with_capacity(3);
        fields.push(format_timestamp(&self.period));
        fields.extend(self.user.iter().cloned());
        fields.extend(self.app.iter().cloned());
        fields
    }
}
