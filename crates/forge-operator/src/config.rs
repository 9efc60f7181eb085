//! Command line and environment configuration

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use forge_git::parse_ttl;
use forge_ingress::{RouteTableRef, DEFAULT_ROUTE_TABLE_NAME, DEFAULT_ROUTE_TABLE_NAMESPACE};
use forge_workload::config::{DEFAULT_IMAGE_REPO, DEFAULT_PIPELINE_NAME};
use forge_workload::WorkloadConfig;

/// forge - builds Workloads from git with Tekton pipelines
#[derive(Parser, Debug)]
#[command(name = "forge-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the Workload CRD as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Controller settings
    #[command(flatten)]
    pub controller: ControllerArgs,

    /// Mode to run in
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Operating modes
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the Workload and Namespace controllers (default mode)
    Controller,
}

/// Settings shared by the controllers
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct ControllerArgs {
    /// Pipeline template every run executes
    #[arg(long, env = "FORGE_PIPELINE_NAME", default_value = DEFAULT_PIPELINE_NAME)]
    pub pipeline_name: String,

    /// Default value of the `image-repo` run parameter
    #[arg(long, env = "FORGE_IMAGE_REPO", default_value = DEFAULT_IMAGE_REPO)]
    pub image_repo: String,

    /// Namespace of the global route table
    #[arg(long, env = "FORGE_ROUTE_TABLE_NAMESPACE", default_value = DEFAULT_ROUTE_TABLE_NAMESPACE)]
    pub route_table_namespace: String,

    /// Name of the global route table
    #[arg(long, env = "FORGE_ROUTE_TABLE_NAME", default_value = DEFAULT_ROUTE_TABLE_NAME)]
    pub route_table_name: String,

    /// Deadline for a single Workload reconcile, in seconds
    #[arg(long, env = "FORGE_RECONCILE_TIMEOUT_SECONDS", default_value_t = 120)]
    pub reconcile_timeout_secs: u64,

    /// Branch head cache TTL in seconds; invalid values fall back to 60
    #[arg(long, env = "GIT_SHA_CACHE_TTL_SECONDS")]
    pub git_cache_ttl: Option<String>,
}

impl ControllerArgs {
    /// Settings for the Workload controller
    pub fn workload_config(&self) -> WorkloadConfig {
        WorkloadConfig {
            pipeline_name: self.pipeline_name.clone(),
            image_repo: self.image_repo.clone(),
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs.max(1)),
            ..WorkloadConfig::default()
        }
    }

    /// Location of the global route table
    pub fn route_table(&self) -> RouteTableRef {
        RouteTableRef {
            namespace: self.route_table_namespace.clone(),
            name: self.route_table_name.clone(),
        }
    }

    /// TTL for cached branch heads
    pub fn git_cache_ttl(&self) -> Duration {
        parse_ttl(self.git_cache_ttl.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("forge-operator").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(!cli.crd);
        assert_eq!(cli.command, None);

        let config = cli.controller.workload_config();
        assert_eq!(config.pipeline_name, "master-ci-pipeline");
        assert_eq!(config.reconcile_timeout, Duration::from_secs(120));
        assert_eq!(cli.controller.route_table(), RouteTableRef::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = parse(&[
            "--pipeline-name",
            "team-ci",
            "--image-repo",
            "quay.io/team",
            "--route-table-namespace",
            "ingress",
            "--route-table-name",
            "root",
            "--reconcile-timeout-secs",
            "30",
            "--git-cache-ttl",
            "15",
            "controller",
        ]);

        assert_eq!(cli.command, Some(Commands::Controller));
        let config = cli.controller.workload_config();
        assert_eq!(config.pipeline_name, "team-ci");
        assert_eq!(config.image_repo, "quay.io/team");
        assert_eq!(config.reconcile_timeout, Duration::from_secs(30));
        assert_eq!(cli.controller.route_table().namespace, "ingress");
        assert_eq!(cli.controller.route_table().name, "root");
        assert_eq!(cli.controller.git_cache_ttl(), Duration::from_secs(15));
    }

    #[test]
    fn test_bad_ttl_falls_back() {
        let cli = parse(&["--git-cache-ttl", "0"]);
        assert_eq!(cli.controller.git_cache_ttl(), Duration::from_secs(60));
        let cli = parse(&["--git-cache-ttl", "later"]);
        assert_eq!(cli.controller.git_cache_ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_crd_flag() {
        assert!(parse(&["--crd"]).crd);
    }
}
