//! 日志初始化

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};

/// 生效的过滤指令：命令行参数优先于配置文件
fn directive<'a>(config: &'a LoggingConfig, level_override: Option<&'a str>) -> &'a str {
    level_override
        .filter(|level| !level.trim().is_empty())
        .unwrap_or(&config.level)
}

/// 安装全局 tracing 订阅器。设置了 `RUST_LOG` 时以环境变量为准
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = directive(config, level_override);
            EnvFilter::try_new(directive)
                .with_context(|| format!("Invalid log level directive: {}", directive))?
        }
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_overrides_config() {
        let config = LoggingConfig {
            level: "info,sqlx=warn".to_string(),
            format: LogFormat::Compact,
        };
        assert_eq!(directive(&config, None), "info,sqlx=warn");
        assert_eq!(directive(&config, Some("debug")), "debug");
        assert_eq!(directive(&config, Some(" ")), "info,sqlx=warn");
    }
}
