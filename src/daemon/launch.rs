use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::runtime::DriverRuntime;

/// Called with the service name right before the process is spawned.
pub type PreStartHook = Arc<dyn Fn(&str, &mut DriverRuntime) + Send + Sync>;

/// Identity of the driver behind a runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverMeta {
    pub name: String,
}

impl DriverMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// How to launch a driver executable.
#[derive(Clone, Default)]
pub struct DriverSpec {
    pub executable: String,
    /// Extra arguments, passed after the service name
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub pre_start: Option<PreStartHook>,
}

impl DriverSpec {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Reads `Executable` and `Arguments` from a driver description.
    /// Missing or mistyped fields are left empty.
    pub fn from_value(value: &Value) -> Self {
        let executable = value
            .get("Executable")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = value
            .get("Arguments")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            executable,
            args,
            ..Self::default()
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn pre_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &mut DriverRuntime) + Send + Sync + 'static,
    {
        self.pre_start = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for DriverSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSpec")
            .field("executable", &self.executable)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("pre_start", &self.pre_start.is_some())
            .finish()
    }
}
