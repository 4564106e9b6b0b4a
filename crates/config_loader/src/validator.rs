//! 配置校验模块
//!
//! 范围约束由 `#[derive(Validate)]` 声明，这里补充语义校验：
//! - 至少一个 credential，id 唯一
//! - 每个 credential 恰好提供 `secret` / `secret_env` 之一
//! - base_backoff_ms <= max_backoff_ms (queue 与 notifications)
//! - channel 名称非空且唯一
//! - file channel 需要 `path`，network channel 需要可解析的 `addr`

use std::collections::HashSet;
use std::net::SocketAddr;

use contracts::{ChannelType, ContractError, DispatchBlueprint};
use validator::Validate;

/// 校验 DispatchBlueprint 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    validate_ranges(blueprint)?;
    validate_credentials(blueprint)?;
    validate_backoff(blueprint)?;
    validate_channels(blueprint)?;
    Ok(())
}

/// 派生的范围校验
fn validate_ranges(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    blueprint
        .validate()
        .map_err(|e| ContractError::config_validation("blueprint", e.to_string()))
}

/// 校验 credential 定义
fn validate_credentials(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    if blueprint.credentials.is_empty() {
        return Err(ContractError::config_validation(
            "credentials",
            "at least one credential is required",
        ));
    }

    let mut seen = HashSet::new();
    for cred in &blueprint.credentials {
        if !seen.insert(cred.id.as_str()) {
            return Err(ContractError::config_validation(
                format!("credentials[id={}]", cred.id),
                "duplicate credential id",
            ));
        }
        match (&cred.secret, &cred.secret_env) {
            (Some(_), None) | (None, Some(_)) => {}
            (Some(_), Some(_)) => {
                return Err(ContractError::config_validation(
                    format!("credentials[{}]", cred.id),
                    "set either secret or secret_env, not both",
                ));
            }
            (None, None) => {
                return Err(ContractError::config_validation(
                    format!("credentials[{}]", cred.id),
                    "one of secret or secret_env is required",
                ));
            }
        }
    }
    Ok(())
}

/// 校验退避区间
fn validate_backoff(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    let sections = [
        (
            "queue",
            blueprint.queue.base_backoff_ms,
            blueprint.queue.max_backoff_ms,
        ),
        (
            "notifications",
            blueprint.notifications.base_backoff_ms,
            blueprint.notifications.max_backoff_ms,
        ),
    ];
    for (section, base, max) in sections {
        if base > max {
            return Err(ContractError::config_validation(
                format!("{section}.base_backoff_ms / {section}.max_backoff_ms"),
                format!("base_backoff_ms ({base}) must be <= max_backoff_ms ({max})"),
            ));
        }
    }
    Ok(())
}

/// 校验 channel 配置
fn validate_channels(blueprint: &DispatchBlueprint) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, channel) in blueprint.notifications.channels.iter().enumerate() {
        if channel.name.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("notifications.channels[{idx}].name"),
                "channel name cannot be empty",
            ));
        }
        if !seen.insert(channel.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("notifications.channels[name={}]", channel.name),
                "duplicate channel name",
            ));
        }

        let field = |param: &str| format!("notifications.channels[{}].params.{param}", channel.name);
        match channel.channel_type {
            ChannelType::Log => {}
            ChannelType::File => {
                let has_path = channel
                    .params
                    .get("path")
                    .is_some_and(|p| !p.trim().is_empty());
                if !has_path {
                    return Err(ContractError::config_validation(
                        field("path"),
                        "file channel requires a path",
                    ));
                }
            }
            ChannelType::Network => {
                let Some(addr) = channel.params.get("addr") else {
                    return Err(ContractError::config_validation(
                        field("addr"),
                        "network channel requires an addr",
                    ));
                };
                if let Err(e) = addr.parse::<SocketAddr>() {
                    return Err(ContractError::config_validation(
                        field("addr"),
                        format!("invalid address '{addr}': {e}"),
                    ));
                }
            }
            ChannelType::Webhook => {
                let url = channel.params.get("url").map(|u| u.trim()).unwrap_or_default();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ContractError::config_validation(
                        field("url"),
                        "webhook channel requires an http(s) url",
                    ));
                }
                if let Some(format) = channel.params.get("format") {
                    if !matches!(format.to_ascii_lowercase().as_str(), "slack" | "discord" | "json") {
                        return Err(ContractError::config_validation(
                            field("format"),
                            format!("unknown webhook format '{format}'"),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
