//! Run the same query against a server launched with two different settings
//! and require identical results.

use std::collections::HashMap;
use std::fmt::Debug;

use harness_common::{HarnessError, Result, ResultExt};
use tracing::info;

use crate::config::ServerConfig;
use crate::server::RemoteServer;

/// Extra CLI args and environment for one side of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSetting {
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ServerSetting {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn apply(&self, base: &ServerConfig) -> ServerConfig {
        let mut config = base.clone().args(self.args.iter().cloned());
        config.env.extend(self.env.clone());
        config
    }
}

/// Launch `base` with `first`, collect `query`'s results, tear the server
/// down, then do the same with `second`. The two result lists must be equal
/// item by item.
///
/// Servers run one after another, never at the same time.
pub fn compare_settings<T, F>(
    base: &ServerConfig,
    first: &ServerSetting,
    second: &ServerSetting,
    mut query: F,
) -> Result<Vec<T>>
where
    T: PartialEq + Debug,
    F: FnMut(&RemoteServer) -> Result<Vec<T>>,
{
    let mut collect = |setting: &ServerSetting| -> Result<Vec<T>> {
        info!("Comparing settings: starting {} with {:?}", base.model, setting);
        let server = RemoteServer::start(setting.apply(base))?;
        let results = query(&server);
        server.stop()?;
        results
    };

    let left = collect(first).context(format!("first setting {:?}", first))?;
    let right = collect(second).context(format!("second setting {:?}", second))?;

    if left.len() != right.len() {
        return Err(HarnessError::SettingsMismatch {
            index: left.len().min(right.len()),
            detail: format!(
                "{} result(s) with {:?} but {} with {:?}",
                left.len(),
                first,
                right.len(),
                second
            ),
        });
    }

    if let Some(index) = left.iter().zip(&right).position(|(l, r)| l != r) {
        return Err(HarnessError::SettingsMismatch {
            index,
            detail: format!(
                "{:?} with {:?} != {:?} with {:?} (model {})",
                left[index], first, right[index], second, base.model
            ),
        });
    }

    Ok(left)
}
