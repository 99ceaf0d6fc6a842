//! Read-only views of the source-control commit status and the Buildkite
//! build graph, as consumed by the commit resolution strategy.

use serde::Deserialize;
use url::Url;

use crate::target::Target;

/// `GET /repos/{owner}/{repo}/commits/{sha}/status`
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStatus {
    #[serde(default)]
    pub statuses: Vec<CommitStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitStatus {
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
}

/// `GET {buildUrl}.json`
#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub jobs: Vec<BuildJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildJob {
    pub id: String,
    #[serde(default)]
    pub step_key: Option<String>,
    /// Path of the job below the Buildkite origin, e.g. `/bun/bun/builds/1/jobs/abc`.
    #[serde(default)]
    pub base_path: Option<String>,
}

/// One entry of `GET .../jobs/{jobId}/artifacts`.
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub path: Option<String>,
    pub url: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Artifact {
    /// File name of the artifact, falling back to the last path segment.
    pub fn name(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .or_else(|| self.path.as_deref()?.rsplit('/').next())
    }
}

/// Build JSON URLs for every status pointing at `ci_host`, deduplicated,
/// in status order.
pub fn build_urls(statuses: &[CommitStatus], ci_host: &str) -> Vec<Url> {
    let mut urls: Vec<Url> = Vec::new();

    for target_url in statuses.iter().filter_map(|s| s.target_url.as_deref()) {
        let Ok(mut url) = Url::parse(target_url) else {
            continue;
        };
        if !url
            .host_str()
            .is_some_and(|host| host.eq_ignore_ascii_case(ci_host))
        {
            continue;
        }

        url.set_query(None);
        url.set_fragment(None);
        let path = format!("{}.json", url.path().trim_end_matches('/'));
        url.set_path(&path);

        if !urls.contains(&url) {
            urls.push(url);
        }
    }

    urls
}

/// Whether a job's step key names a build of `target`.
///
/// Step keys are free-form, so this is a substring match: `build-bun`, the
/// OS and the architecture must all appear, plus `baseline` and the ABI
/// when the target has them.
pub fn job_matches(step_key: &str, target: &Target) -> bool {
    step_key.contains("build-bun")
        && step_key.contains(target.os.as_str())
        && step_key.contains(target.arch.as_str())
        && (!target.baseline || step_key.contains("baseline"))
        && target.abi.map_or(true, |abi| step_key.contains(abi.as_str()))
}

/// First job, in provider order, whose step key matches `target`.
pub fn select_job<'a>(jobs: &'a [BuildJob], target: &Target) -> Option<&'a BuildJob> {
    jobs.iter().find(|job| {
        job.step_key
            .as_deref()
            .is_some_and(|key| job_matches(key, target))
    })
}

/// Number of jobs whose step key matches `target`.
pub fn count_matching_jobs(jobs: &[BuildJob], target: &Target) -> usize {
    jobs.iter()
        .filter(|job| {
            job.step_key
                .as_deref()
                .is_some_and(|key| job_matches(key, target))
        })
        .count()
}

/// Artifact listing URL for `job` of the build described by `build_url`.
pub fn artifacts_url(job: &BuildJob, build_url: &Url, buildkite_url: &Url) -> Option<Url> {
    match &job.base_path {
        Some(base_path) => buildkite_url
            .join(&format!("{}/artifacts", base_path.trim_end_matches('/')))
            .ok(),
        None => {
            let build_path = build_url.path().trim_end_matches(".json");
            build_url
                .join(&format!("{build_path}/jobs/{}/artifacts", job.id))
                .ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str, key: &str) -> BuildJob {
        BuildJob {
            id: id.to_string(),
            step_key: Some(key.to_string()),
            base_path: None,
        }
    }

    fn status(url: &str) -> CommitStatus {
        CommitStatus {
            context: None,
            target_url: Some(url.to_string()),
        }
    }

    #[test]
    fn test_build_urls_filters_and_dedupes() {
        let statuses = vec![
            status("https://buildkite.com/bun/bun/builds/100#job-1"),
            status("https://github.com/oven-sh/bun/actions/runs/1"),
            status("https://buildkite.com/bun/bun/builds/100?tab=jobs"),
            status("https://buildkite.com/bun/bun/builds/101"),
            CommitStatus {
                context: Some("lint".to_string()),
                target_url: None,
            },
            status("not a url"),
        ];

        let urls = build_urls(&statuses, "buildkite.com");
        let urls: Vec<&str> = urls.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://buildkite.com/bun/bun/builds/100.json",
                "https://buildkite.com/bun/bun/builds/101.json",
            ]
        );
    }

    #[test]
    fn test_job_matches_requires_all_parts() {
        let target = Target::parse("linux-x64").unwrap();
        assert!(job_matches("linux-x64-build-bun", &target));
        assert!(!job_matches("linux-x64-build-cpp", &target));
        assert!(!job_matches("darwin-x64-build-bun", &target));
        assert!(!job_matches("linux-aarch64-build-bun", &target));
    }

    #[test]
    fn test_job_matches_baseline_and_abi() {
        let baseline = Target::parse("linux-x64-baseline").unwrap();
        assert!(!job_matches("linux-x64-build-bun", &baseline));
        assert!(job_matches("linux-x64-baseline-build-bun", &baseline));

        let musl = Target::parse("linux-aarch64-musl").unwrap();
        assert!(!job_matches("linux-aarch64-build-bun", &musl));
        assert!(job_matches("linux-aarch64-musl-build-bun", &musl));

        // Plain targets accept variant jobs too; provider order decides.
        let plain = Target::parse("linux-x64").unwrap();
        assert!(job_matches("linux-x64-baseline-build-bun", &plain));
    }

    #[test]
    fn test_select_job_takes_first_in_provider_order() {
        let target = Target::parse("darwin-aarch64").unwrap();
        let jobs = vec![
            BuildJob {
                id: "0".to_string(),
                step_key: None,
                base_path: None,
            },
            job("1", "darwin-aarch64-build-cpp"),
            job("2", "darwin-aarch64-build-bun"),
            job("3", "darwin-aarch64-build-bun-profile"),
        ];

        assert_eq!(select_job(&jobs, &target).map(|j| j.id.as_str()), Some("2"));
        assert_eq!(count_matching_jobs(&jobs, &target), 2);
        assert!(select_job(&jobs[..2], &target).is_none());
    }

    #[test]
    fn test_artifacts_url_from_base_path() {
        let mut job = job("abc", "linux-x64-build-bun");
        job.base_path = Some("/bun/bun/builds/100/jobs/abc".to_string());
        let build_url = Url::parse("https://buildkite.com/bun/bun/builds/100.json").unwrap();
        let buildkite_url = Url::parse("https://buildkite.com/").unwrap();

        let url = artifacts_url(&job, &build_url, &buildkite_url).unwrap();
        assert_eq!(
            url.as_str(),
            "https://buildkite.com/bun/bun/builds/100/jobs/abc/artifacts"
        );
    }

    #[test]
    fn test_artifacts_url_from_build_url() {
        let job = job("abc", "linux-x64-build-bun");
        let build_url = Url::parse("https://buildkite.com/bun/bun/builds/100.json").unwrap();
        let buildkite_url = Url::parse("https://buildkite.com/").unwrap();

        let url = artifacts_url(&job, &build_url, &buildkite_url).unwrap();
        assert_eq!(
            url.as_str(),
            "https://buildkite.com/bun/bun/builds/100/jobs/abc/artifacts"
        );
    }

    #[test]
    fn test_artifact_name_fallback() {
        let artifact = Artifact {
            path: Some("dist/bun-linux-x64.zip".to_string()),
            url: "https://example.com/a".to_string(),
            file_name: None,
        };
        assert_eq!(artifact.name(), Some("bun-linux-x64.zip"));
    }
}
