//! Solver options: values, the process-wide store and per-solver option managers.
//!
//! Options are PETSc-style `key → value` pairs (`snes_type = newtonls`, `ksp_rtol = 1e-7`,
//! `snes_monitor` as a bare flag). Every solver owns an [`OptionsManager`] holding its merged
//! parameters under a unique prefix. While a solve runs, [`OptionsManager::inserted_options`]
//! installs those parameters into an [`OptionsDatabase`], where the engine reads them; the
//! returned guard restores the previous contents on drop, including on early return.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::VError;

/// Value of a single option.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Real(f64),
    Bool(bool),
    /// Present with no value (e.g. `snes_monitor`).
    Flag,
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => write!(f, "{s}"),
            OptionValue::Int(i) => write!(f, "{i}"),
            OptionValue::Real(r) => write!(f, "{r:e}"),
            OptionValue::Bool(b) => write!(f, "{b}"),
            OptionValue::Flag => Ok(()),
        }
    }
}

impl From<&str> for OptionValue {
    fn from(s: &str) -> Self {
        OptionValue::Str(s.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(s: String) -> Self {
        OptionValue::Str(s)
    }
}

impl From<f64> for OptionValue {
    fn from(r: f64) -> Self {
        OptionValue::Real(r)
    }
}

impl From<i64> for OptionValue {
    fn from(i: i64) -> Self {
        OptionValue::Int(i)
    }
}

impl From<i32> for OptionValue {
    fn from(i: i32) -> Self {
        OptionValue::Int(i64::from(i))
    }
}

impl From<usize> for OptionValue {
    fn from(i: usize) -> Self {
        OptionValue::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for OptionValue {
    fn from(b: bool) -> Self {
        OptionValue::Bool(b)
    }
}

impl From<()> for OptionValue {
    fn from(_: ()) -> Self {
        OptionValue::Flag
    }
}

/// Solver parameters keyed by option name (without prefix).
pub type SolverParameters = BTreeMap<String, OptionValue>;

/// Build [`SolverParameters`] from `key => value` pairs.
///
/// ```
/// let p = varsolve::parameters! { "snes_type" => "newtonls", "snes_rtol" => 1e-9, "snes_monitor" => () };
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! parameters {
    ($($k:expr => $v:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut p = $crate::config::options::SolverParameters::new();
        $( p.insert(::std::string::String::from($k), $crate::config::options::OptionValue::from($v)); )*
        p
    }};
}

/// Merge `defaults` under `explicit`: explicit keys win, missing keys are filled from defaults.
pub fn merge_defaults(explicit: &SolverParameters, defaults: &SolverParameters) -> SolverParameters {
    let mut merged = explicit.clone();
    for (k, v) in defaults {
        merged.entry(k.clone()).or_insert_with(|| v.clone());
    }
    merged
}

/// Process-wide, prefix-scoped option table. Clones share the same table.
#[derive(Clone, Default)]
pub struct OptionsDatabase {
    inner: Arc<Mutex<BTreeMap<String, OptionValue>>>,
}

static GLOBAL_OPTIONS: OnceLock<OptionsDatabase> = OnceLock::new();

impl OptionsDatabase {
    /// Fresh private table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process singleton.
    pub fn global() -> Self {
        GLOBAL_OPTIONS.get_or_init(OptionsDatabase::new).clone()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, OptionValue>> {
        // A panic while holding the lock leaves the table itself consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<OptionValue>) -> Option<OptionValue> {
        self.lock().insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<OptionValue> {
        self.lock().remove(key)
    }

    pub fn get(&self, key: &str) -> Option<OptionValue> {
        self.lock().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All entries whose key starts with `prefix`, with the prefix stripped.
    pub fn get_all(&self, prefix: &str) -> SolverParameters {
        self.lock()
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(prefix).map(|s| (s.to_owned(), v.clone())))
            .collect()
    }

    /// Parse PETSc-style arguments: `-key value` pairs and bare `-flag`s.
    ///
    /// Tokens that do not start with `-` and do not follow a key are ignored.
    pub fn insert_args<I, S>(&self, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pending: Option<String> = None;
        for tok in args {
            let tok = tok.as_ref();
            let is_key = tok.starts_with('-') && tok.len() > 1 && tok.parse::<f64>().is_err();
            if is_key {
                if let Some(flag) = pending.take() {
                    self.set(flag, OptionValue::Flag);
                }
                pending = Some(tok.trim_start_matches('-').to_owned());
            } else if let Some(key) = pending.take() {
                self.set(key, parse_value(tok));
            }
        }
        if let Some(flag) = pending {
            self.set(flag, OptionValue::Flag);
        }
    }

    fn parse_typed<T: FromStr>(&self, key: &str) -> Result<Option<T>, VError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => {
                let text = v.to_string();
                text.parse::<T>()
                    .map(Some)
                    .map_err(|_| VError::InvalidOption { key: key.to_owned(), value: text })
            }
        }
    }

    pub fn get_real(&self, key: &str) -> Result<Option<f64>, VError> {
        self.parse_typed(key)
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, VError> {
        match self.get(key) {
            Some(OptionValue::Real(r)) if r.fract() == 0.0 => Ok(Some(r as i64)),
            _ => self.parse_typed(key),
        }
    }

    /// Flags read as `true`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, VError> {
        match self.get(key) {
            None => Ok(None),
            Some(OptionValue::Flag) => Ok(Some(true)),
            Some(OptionValue::Bool(b)) => Ok(Some(b)),
            Some(OptionValue::Int(i)) => Ok(Some(i != 0)),
            Some(other) => match other.to_string().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                text => Err(VError::InvalidOption { key: key.to_owned(), value: text.to_owned() }),
            },
        }
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }
}

impl fmt::Debug for OptionsDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.lock().iter()).finish()
    }
}

fn parse_value(tok: &str) -> OptionValue {
    if let Ok(i) = tok.parse::<i64>() {
        OptionValue::Int(i)
    } else if let Ok(r) = tok.parse::<f64>() {
        OptionValue::Real(r)
    } else {
        match tok {
            "true" => OptionValue::Bool(true),
            "false" => OptionValue::Bool(false),
            s => OptionValue::Str(s.to_owned()),
        }
    }
}

static PREFIX_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Merged parameters of one solver plus the prefix they live under.
#[derive(Debug, Clone)]
pub struct OptionsManager {
    parameters: SolverParameters,
    options_prefix: String,
    database: OptionsDatabase,
}

impl OptionsManager {
    /// Merge `explicit` over `defaults`, choosing `prefix` or a fresh unique one.
    pub fn new(
        explicit: &SolverParameters,
        defaults: &SolverParameters,
        prefix: Option<&str>,
        database: OptionsDatabase,
    ) -> Self {
        let options_prefix = match prefix {
            Some(p) if p.ends_with('_') => p.to_owned(),
            Some(p) => format!("{p}_"),
            None => format!("varsolve_{}_", PREFIX_COUNT.fetch_add(1, Ordering::Relaxed)),
        };
        let parameters = merge_defaults(explicit, defaults);
        log::debug!("{options_prefix}: configured with {} options", parameters.len());
        Self { parameters, options_prefix, database }
    }

    pub fn parameters(&self) -> &SolverParameters {
        &self.parameters
    }

    pub fn options_prefix(&self) -> &str {
        &self.options_prefix
    }

    pub fn database(&self) -> &OptionsDatabase {
        &self.database
    }

    /// Install the parameters into the database for the lifetime of the guard.
    pub fn inserted_options(&self) -> InsertedOptions {
        let saved = self
            .parameters
            .iter()
            .map(|(k, v)| {
                let key = format!("{}{}", self.options_prefix, k);
                let previous = self.database.set(key.clone(), v.clone());
                (key, previous)
            })
            .collect();
        InsertedOptions { database: self.database.clone(), saved }
    }
}

/// Guard returned by [`OptionsManager::inserted_options`].
#[must_use = "options are removed again when the guard is dropped"]
pub struct InsertedOptions {
    database: OptionsDatabase,
    saved: Vec<(String, Option<OptionValue>)>,
}

impl Drop for InsertedOptions {
    fn drop(&mut self) {
        let mut table = self.database.lock();
        for (key, previous) in self.saved.drain(..).rev() {
            match previous {
                Some(v) => {
                    table.insert(key, v);
                }
                None => {
                    table.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_options_win_over_defaults() {
        let explicit = crate::parameters! { "tol" => 1e-8 };
        let defaults = crate::parameters! { "tol" => 1e-5, "maxit" => 50 };
        let merged = merge_defaults(&explicit, &defaults);
        assert_eq!(merged, crate::parameters! { "tol" => 1e-8, "maxit" => 50 });
    }

    #[test]
    fn prefixes_are_unique_and_normalised() {
        let db = OptionsDatabase::new();
        let empty = SolverParameters::new();
        let a = OptionsManager::new(&empty, &empty, None, db.clone());
        let b = OptionsManager::new(&empty, &empty, None, db.clone());
        assert_ne!(a.options_prefix(), b.options_prefix());
        let c = OptionsManager::new(&empty, &empty, Some("heat"), db);
        assert_eq!(c.options_prefix(), "heat_");
    }

    #[test]
    fn inserted_options_restore_previous_state() {
        let db = OptionsDatabase::new();
        db.set("p_ksp_type", "gmres");
        db.set("p_snes_view", OptionValue::Flag);
        let params = crate::parameters! { "ksp_type" => "preonly", "snes_rtol" => 1e-9 };
        let mgr = OptionsManager::new(&params, &SolverParameters::new(), Some("p_"), db.clone());
        {
            let _guard = mgr.inserted_options();
            assert_eq!(db.get_str("p_ksp_type").as_deref(), Some("preonly"));
            assert_eq!(db.get_real("p_snes_rtol").unwrap(), Some(1e-9));
            assert_eq!(db.get_bool("p_snes_view").unwrap(), Some(true));
        }
        assert_eq!(db.get_str("p_ksp_type").as_deref(), Some("gmres"));
        assert!(!db.has("p_snes_rtol"));
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn guard_restores_on_panic() {
        let db = OptionsDatabase::new();
        let params = crate::parameters! { "snes_max_it" => 3 };
        let mgr = OptionsManager::new(&params, &SolverParameters::new(), Some("q"), db.clone());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = mgr.inserted_options();
            panic!("engine blew up");
        }));
        assert!(result.is_err());
        assert!(db.is_empty());
    }

    #[test]
    fn command_line_arguments() {
        let db = OptionsDatabase::new();
        db.insert_args(["-snes_monitor", "-ksp_type", "gmres", "-snes_atol", "-1e-3", "-snes_max_it", "7", "-ksp_monitor"]);
        assert_eq!(db.get_bool("snes_monitor").unwrap(), Some(true));
        assert_eq!(db.get_str("ksp_type").as_deref(), Some("gmres"));
        assert_eq!(db.get_real("snes_atol").unwrap(), Some(-1e-3));
        assert_eq!(db.get_int("snes_max_it").unwrap(), Some(7));
        assert!(db.has("ksp_monitor"));
        assert_eq!(db.get_all("snes_").len(), 3);
        db.set("bad", "abc");
        assert!(matches!(db.get_real("bad"), Err(VError::InvalidOption { .. })));
    }
}
