//! Robot definition files (TOML).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::io::config::write_atomic;
use crate::robot::{DeliveryTarget, Identity, Robot};

/// Default robot file name in the working directory.
pub const ROBOT_FILE: &str = "robot.toml";

/// Load and validate a robot definition.
pub fn load_robot(path: &Path) -> Result<Robot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read robot {}", path.display()))?;
    let robot: Robot =
        toml::from_str(&contents).with_context(|| format!("parse robot {}", path.display()))?;
    validate_robot(&robot).with_context(|| format!("invalid robot {}", path.display()))?;
    Ok(robot)
}

pub fn write_robot(path: &Path, robot: &Robot) -> Result<()> {
    validate_robot(robot)?;
    let mut buf = toml::to_string_pretty(robot).context("serialize robot toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes())
}

pub fn validate_robot(robot: &Robot) -> Result<()> {
    if robot.member_id.trim().is_empty() {
        bail!("member_id must not be empty");
    }
    if robot.team_id.trim().is_empty() {
        bail!("team_id must not be empty");
    }
    if robot.quota.max == 0 {
        bail!("quota.max must be >= 1");
    }
    for (index, target) in robot.delivery.targets.iter().enumerate() {
        if target.kind.trim().is_empty() || target.target.trim().is_empty() {
            bail!("delivery.targets[{index}] needs both kind and target");
        }
    }
    for server in &robot.resources.mcp {
        if server.id.is_empty() || server.id.contains('.') {
            bail!("resources.mcp id '{}' must be non-empty without '.'", server.id);
        }
    }
    Ok(())
}

/// Starter robot written by `init`.
pub fn sample_robot() -> Robot {
    let mut robot = Robot::new("analyst-01", "team-01");
    robot.display_name = "Data Analyst".to_string();
    robot.identity = Some(Identity {
        role: "Data analyst".to_string(),
        duties: vec!["Summarize sales data".to_string()],
        rules: vec!["Cite the numbers you used".to_string()],
    });
    robot.resources.agents = vec!["analyst".to_string()];
    robot.delivery.targets = vec![DeliveryTarget {
        kind: "file".to_string(),
        target: ".robot/deliveries.jsonl".to_string(),
        enabled: true,
    }];
    robot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_robot_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(ROBOT_FILE);
        let robot = sample_robot();
        write_robot(&path, &robot).expect("write");
        let loaded = load_robot(&path).expect("load");
        assert_eq!(loaded.member_id, robot.member_id);
        assert_eq!(loaded.identity, robot.identity);
        assert_eq!(loaded.delivery, robot.delivery);
        assert_eq!(loaded.running(), 0);
    }

    #[test]
    fn minimal_robot_file_uses_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(ROBOT_FILE);
        fs::write(
            &path,
            "member_id = \"r1\"\nteam_id = \"t1\"\n\n[[delivery.targets]]\nkind = \"webhook\"\ntarget = \"https://example.com\"\n",
        )
        .expect("write");
        let robot = load_robot(&path).expect("load");
        assert_eq!(robot.quota.max, 2);
        assert!(robot.delivery.targets[0].enabled);
        assert!(robot.identity.is_none());
    }

    #[test]
    fn invalid_robot_is_rejected() {
        let mut robot = sample_robot();
        robot.quota.max = 0;
        assert!(validate_robot(&robot).is_err());
        let mut robot = sample_robot();
        robot.member_id.clear();
        assert!(validate_robot(&robot).is_err());
    }
}
