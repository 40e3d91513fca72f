//! Environment-inspection queries that run inside a worker session.
//!
//! Each helper runs a small Python script in the worker to synthesize a
//! table, then snapshots it. Only Python workers support these; other
//! session kinds get an *unsupported* error.

use dh_domain::{Error, Result};

use crate::session::BaseSession;
use crate::table::TableSnapshot;

const PIP_PACKAGES_TABLE: &str = "_pip_packages_table";
const PYTHON_VERSION_TABLE: &str = "_python_version_table";

// Scripts execute inside the worker's Python environment; column names are
// capitalized to stay clear of reserved identifiers there.
const PIP_PACKAGES_SCRIPT: &str = r#"
from deephaven import new_table, string_col
import importlib.metadata as importlib_metadata

def _make_pip_packages_table():
    names = []
    versions = []
    for dist in importlib_metadata.distributions():
        names.append(dist.metadata['Name'])
        versions.append(dist.version)
    return new_table([
        string_col('Package', names),
        string_col('Version', versions),
    ])

_pip_packages_table = _make_pip_packages_table()
"#;

const PYTHON_VERSION_SCRIPT: &str = r#"
from deephaven import new_table, string_col, int_col
import sys
import platform

def _make_python_version_table():
    version_info = sys.version_info
    version_str = sys.version.split()[0]
    implementation = platform.python_implementation()

    return new_table([
        string_col('Version', [version_str]),
        int_col('Major', [version_info.major]),
        int_col('Minor', [version_info.minor]),
        int_col('Micro', [version_info.micro]),
        string_col('Implementation', [implementation]),
        string_col('FullVersion', [sys.version]),
    ])

_python_version_table = _make_python_version_table()
"#;

fn require_python(session: &dyn BaseSession, what: &str) -> Result<()> {
    let language = session.programming_language();
    if !language.eq_ignore_ascii_case("python") {
        tracing::warn!(language = %language, "{what} requested against a non-Python session");
        return Err(Error::Unsupported(format!(
            "{what} only supports Python sessions, but session '{}' uses {language}",
            session.name()
        )));
    }
    Ok(())
}

/// Table of installed pip packages (`Package`, `Version` columns).
pub async fn get_pip_packages_table(session: &dyn BaseSession) -> Result<TableSnapshot> {
    require_python(session, "pip package listing")?;
    session.run_script(PIP_PACKAGES_SCRIPT).await?;
    session.table_data(PIP_PACKAGES_TABLE, None, true).await
}

/// The worker's programming-language version string (e.g. "3.12.1").
pub async fn get_programming_language_version(session: &dyn BaseSession) -> Result<String> {
    require_python(session, "language version inspection")?;
    session.run_script(PYTHON_VERSION_SCRIPT).await?;
    let table = session.table_data(PYTHON_VERSION_TABLE, Some(1), true).await?;
    table
        .first_value("Version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Query("language version table is missing a 'Version' value".into())
        })
}

/// The installed Deephaven Core and Core+ versions, read from the worker's
/// pip environment. Either may be `None` when the package is absent.
pub async fn get_dh_versions(
    session: &dyn BaseSession,
) -> Result<(Option<String>, Option<String>)> {
    require_python(session, "Deephaven version inspection")?;
    let table = get_pip_packages_table(session).await?;

    let mut core_version = None;
    let mut coreplus_version = None;
    for row in &table.rows {
        let package = row
            .get("Package")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let version = row.get("Version").and_then(|v| v.as_str());
        match package.as_str() {
            "deephaven-core" if core_version.is_none() => {
                core_version = version.map(str::to_string);
            }
            "deephaven_coreplus_worker" if coreplus_version.is_none() => {
                coreplus_version = version.map(str::to_string);
            }
            _ => {}
        }
        if core_version.is_some() && coreplus_version.is_some() {
            break;
        }
    }

    tracing::debug!(
        core = ?core_version,
        coreplus = ?coreplus_version,
        "resolved Deephaven versions from worker pip environment"
    );
    Ok((core_version, coreplus_version))
}
