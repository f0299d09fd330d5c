//! `fleetd check-config` — validate fleet.toml and optionally the compute
//! resources it names.

use std::path::Path;

use anyhow::{Context, bail};
use fleet_compute::ComputeClient;
use fleet_core::{BootSource, FleetConfig};
use tracing::debug;

use crate::daemon::backends;

/// Validate the config at `path` and print a summary. With `remote`, also check
/// referenced resources against the compute listings.
pub async fn check_config(path: &Path, remote: bool) -> anyhow::Result<()> {
    let config = FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    print_summary(&config);

    if remote {
        let (compute, _) = backends(&config.daemon);
        let problems = check_remote(&config, compute.as_ref()).await?;
        if !problems.is_empty() {
            for problem in &problems {
                println!("  ✗ {problem}");
            }
            bail!("{} remote check(s) failed", problems.len());
        }
        println!("remote resources OK");
    }
    Ok(())
}

fn print_summary(config: &FleetConfig) {
    println!(
        "{} controller(s), {} template(s)",
        config.controllers.len(),
        config.template_count()
    );
    for c in &config.controllers {
        let cap = c
            .instance_cap
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string());
        println!("  {} ({}) project={} cap={cap}", c.name, c.id, c.project);
        for t in &c.templates {
            println!(
                "    {:<24} {:<16} {:<16} executors={} labels=[{}]{}",
                t.description,
                t.zone,
                t.machine_type,
                t.executors,
                t.labels,
                if t.one_shot { " one-shot" } else { "" },
            );
        }
    }
}

/// Problems found checking each template's zone, machine type, network and
/// instance template against the provider's listings.
pub async fn check_remote(
    config: &FleetConfig,
    compute: &dyn ComputeClient,
) -> anyhow::Result<Vec<String>> {
    let mut problems = Vec::new();

    for c in &config.controllers {
        let networks = compute.list_networks(&c.project).await?;
        let instance_templates = compute.list_instance_templates(&c.project).await?;

        for t in &c.templates {
            let at = format!("{}/{}", c.id, t.description);
            debug!(template = %at, "checking remote resources");

            let zones = match compute.list_zones(&c.project, &t.region).await {
                Ok(zones) => zones,
                Err(e) if e.is_not_found() => {
                    problems.push(format!("{at}: region {} not found", t.region));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !zones.contains(&t.zone) {
                problems.push(format!("{at}: zone {} not in region {}", t.zone, t.region));
                continue;
            }
            let machine_types = compute.list_machine_types(&c.project, &t.zone).await?;
            if !machine_types.contains(&t.machine_type) {
                problems.push(format!(
                    "{at}: machine type {} not offered in {}",
                    t.machine_type, t.zone
                ));
            }
            if !networks.contains(&t.network.network) {
                problems.push(format!("{at}: network {} not found", t.network.network));
            }
            if let BootSource::InstanceTemplate(name) = &t.boot.source {
                if !instance_templates.contains(name) {
                    problems.push(format!("{at}: instance template {name} not found"));
                }
            }
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_compute::SimulatedCompute;
    use fleet_core::WorkerTemplate;
    use fleet_core::fixtures::{controller, template};

    fn fleet(templates: Vec<WorkerTemplate>) -> FleetConfig {
        FleetConfig {
            daemon: Default::default(),
            controllers: vec![controller("c1", templates)],
        }
    }

    #[tokio::test]
    async fn known_resources_pass() {
        let problems = check_remote(&fleet(vec![template("build", "")]), &SimulatedCompute::new())
            .await
            .unwrap();
        assert!(problems.is_empty(), "{problems:?}");
    }

    #[tokio::test]
    async fn unknown_resources_are_reported() {
        let bad_zone = WorkerTemplate {
            zone: "us-central1-z".to_string(),
            ..template("zone", "")
        };
        let bad_shape = WorkerTemplate {
            machine_type: "m9-huge".to_string(),
            ..template("shape", "")
        };
        let mut bad_boot = template("boot", "");
        bad_boot.boot.source = BootSource::InstanceTemplate("missing".to_string());

        let problems = check_remote(
            &fleet(vec![bad_zone, bad_shape, bad_boot]),
            &SimulatedCompute::new(),
        )
        .await
        .unwrap();
        assert_eq!(problems.len(), 3, "{problems:?}");
        assert!(problems[0].contains("us-central1-z"));
        assert!(problems[1].contains("m9-huge"));
        assert!(problems[2].contains("missing"));
    }
}
