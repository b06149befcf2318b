// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `config.rs`

#[cfg(test)]
mod tests {
    use super::super::OperatorSettings;
    use crate::constants::{DEFAULT_ADMIN_TIMEOUT_SECS, DEFAULT_LEASE_NAME};
    use clap::Parser;
    use std::time::Duration;

    #[test]
    fn test_flags_override_defaults() {
        let settings = OperatorSettings::try_parse_from([
            "dbop",
            "--namespace",
            "ops",
            "--leader-election",
            "false",
            "--lease-duration-secs",
            "30",
            "--metrics-addr",
            "127.0.0.1:9100",
            "--admin-timeout-secs",
            "60",
            "--pod-name",
            "dbop-0",
        ])
        .unwrap();

        assert_eq!(settings.namespace, "ops");
        assert!(!settings.leader_election);
        assert_eq!(settings.lease_duration_secs, 30);
        assert_eq!(settings.metrics_addr.port(), 9100);
        assert_eq!(settings.admin_timeout(), Duration::from_secs(60));
        assert_eq!(settings.identity(), "dbop-0");
    }

    #[test]
    fn test_defaults() {
        let settings = OperatorSettings::try_parse_from(["dbop"]).unwrap();

        assert_eq!(settings.lease_name, DEFAULT_LEASE_NAME);
        assert_eq!(settings.admin_timeout_secs, DEFAULT_ADMIN_TIMEOUT_SECS);
        assert!(!settings.identity().is_empty());
    }

    #[test]
    fn test_invalid_metrics_addr_is_rejected() {
        let result = OperatorSettings::try_parse_from(["dbop", "--metrics-addr", "not-an-addr"]);
        assert!(result.is_err());
    }
}
