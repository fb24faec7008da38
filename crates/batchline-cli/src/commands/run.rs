//! `batchline run` - launch a job

use batchline_core::{Launcher, RunParams, RunStatus};
use tracing::info;

use crate::error::{CliError, Result};

/// Parse `key=value` pairs into launch parameters.
pub fn parse_params(raw: &[String]) -> Result<RunParams> {
    let mut params = RunParams::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(CliError::InvalidParameter(format!(
                "expected key=value, got {pair:?}"
            )));
        };
        if key.trim().is_empty() {
            return Err(CliError::InvalidParameter(format!(
                "empty key in {pair:?}"
            )));
        }
        params.insert(key.trim().to_string(), value.to_string());
    }
    Ok(params)
}

/// Launch `job` and report the finalized run. Returns the terminal status
/// so the caller can pick the process exit code.
pub async fn run(launcher: &Launcher, job: &str, raw_params: &[String]) -> Result<RunStatus> {
    let params = parse_params(raw_params)?;
    info!(job, ?params, "launching");

    let entry = launcher.launch(job, params).await?;

    println!("run:      {}", entry.run_id);
    println!("job:      {}", entry.job_name);
    println!("status:   {}", entry.status);
    println!(
        "counts:   read={} write={} skip={} filtered={}",
        entry.read_count, entry.write_count, entry.skip_count, entry.filtered_count
    );
    if let Some(declared) = entry.declared_count {
        println!("declared: {declared}");
    }
    if let Some(cause) = &entry.failure_cause {
        println!("cause:    {cause}");
    }
    Ok(entry.status)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        let params =
            parse_params(&["input.file=/data/in.txt".into(), "region=eu".into()]).unwrap();
        assert_eq!(params.get("input.file").unwrap(), "/data/in.txt");
        assert_eq!(params.get("region").unwrap(), "eu");
    }

    #[test]
    fn test_parse_params_keeps_equals_in_value() {
        let params = parse_params(&["query=a=b".into()]).unwrap();
        assert_eq!(params.get("query").unwrap(), "a=b");
    }

    #[test]
    fn test_parse_params_rejects_bare_words() {
        assert!(parse_params(&["no-value".into()]).is_err());
        assert!(parse_params(&["=value".into()]).is_err());
    }
}
