//! `pga roles`：管理高低权限角色集合（role_level.json）

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::ValueEnum;
use pga_detect::lookup::split_multi;
use pga_detect::{RoleLevels, RoleTier};

use crate::config::{Config, ROLE_LEVEL_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    High,
    Low,
}

impl From<LevelArg> for RoleTier {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::High => RoleTier::High,
            LevelArg::Low => RoleTier::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleAction {
    List,
    Add(Vec<String>),
    Remove(Vec<String>),
    Set(Vec<String>),
    Clear,
}

impl RoleAction {
    pub fn from_flags(
        list: bool,
        add: Option<String>,
        remove: Option<String>,
        set: Option<String>,
        clear: bool,
    ) -> Result<Self> {
        let roles = |raw: String, flag: &str| -> Result<Vec<String>> {
            let roles = split_multi(&raw);
            if roles.is_empty() {
                bail!("--{flag} needs at least one role name");
            }
            Ok(roles)
        };
        match (list, add, remove, set, clear) {
            (true, None, None, None, false) => Ok(Self::List),
            (false, Some(raw), None, None, false) => Ok(Self::Add(roles(raw, "add")?)),
            (false, None, Some(raw), None, false) => Ok(Self::Remove(roles(raw, "remove")?)),
            // an empty --set-roles is the same as --clear
            (false, None, None, Some(raw), false) => Ok(Self::Set(split_multi(&raw))),
            (false, None, None, None, true) => Ok(Self::Clear),
            _ => bail!("exactly one of --list, --add, --remove, --set-roles, --clear is required"),
        }
    }

    /// Apply to `levels`; returns false for read-only actions.
    pub fn apply(&self, levels: &mut RoleLevels, tier: RoleTier) -> bool {
        match self {
            Self::List => return false,
            Self::Add(roles) => levels.add(tier, roles),
            Self::Remove(roles) => levels.remove(tier, roles),
            Self::Set(roles) => levels.set(tier, roles),
            Self::Clear => levels.clear(tier),
        }
        true
    }
}

pub fn run(
    config: &Config,
    role_config: Option<PathBuf>,
    level: LevelArg,
    action: RoleAction,
) -> Result<()> {
    let path = config.assist_file(role_config, ROLE_LEVEL_FILE);
    let tier = RoleTier::from(level);
    let mut levels = RoleLevels::load(&path);

    if action.apply(&mut levels, tier) {
        levels.save(&path)?;
        tracing::info!(
            path = %path.display(),
            level = tier.key(),
            roles = levels.tier(tier).len(),
            "role level config updated"
        );
    }
    println!("{}", serde_json::to_string_pretty(&levels)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_flags() {
        assert_eq!(
            RoleAction::from_flags(false, Some("a, b|c".into()), None, None, false).unwrap(),
            RoleAction::Add(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(
            RoleAction::from_flags(true, None, None, None, false).unwrap(),
            RoleAction::List
        );
        assert!(RoleAction::from_flags(true, None, None, None, true).is_err());
        assert!(RoleAction::from_flags(false, None, Some(" ".into()), None, false).is_err());
    }

    #[test]
    fn test_apply_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            store_dir: dir.path().join("graph"),
            assist_dir: dir.path().to_path_buf(),
        };
        let action = RoleAction::Set(vec!["reader".into(), "auditor".into()]);
        run(&config, None, LevelArg::Low, action).unwrap();

        let levels = RoleLevels::load(&dir.path().join(ROLE_LEVEL_FILE));
        assert_eq!(levels.low_authorized, vec!["auditor", "reader"]);
        assert_eq!(levels.high_authorized, RoleLevels::default().high_authorized);

        let mut levels = levels;
        assert!(!RoleAction::List.apply(&mut levels, RoleTier::High));
        assert!(RoleAction::Clear.apply(&mut levels, RoleTier::High));
        assert!(levels.high_authorized.is_empty());
    }
}
