//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(WeathersetError)` on parser failure.
///
/// Example:
/// ```no_run
/// # use weatherset::{parsed_config, WeathersetError};
/// # #[derive(Default)]
/// # struct MyConfig { ttl_ms: u64, backup_path: String }
/// # fn main() -> Result<(), WeathersetError> {
/// # let config_str: Option<&str> = None;
/// let config = parsed_config!(config_str => MyConfig; ttl_ms, backup_path)?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::WeathersetError> {
            let mut config: $config_type = Default::default();
            if config_str.is_none() {
                return Ok(config);
            }

            let mut table = config_str.unwrap().parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if !table.is_empty() {
                return Err($crate::WeathersetError::msg(format!(
                    "invalid field name '{}' in config",
                    table.keys().next().unwrap(),
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod tests {
    use crate::utils::WeathersetError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        ttl_ms: u64,
        backup_path: String,
        capacity: usize,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                ttl_ms: 30000,
                backup_path: "backup.txt".into(),
                capacity: 20,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), WeathersetError> {
        let config = parsed_config!(None => TestConfig;
                                    ttl_ms, backup_path, capacity)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), WeathersetError> {
        let config_str = Some("backup_path = '/tmp/wset.bak'");
        let config = parsed_config!(config_str => TestConfig;
                                    backup_path, capacity)?;
        let ref_config = TestConfig {
            ttl_ms: 30000,
            backup_path: "/tmp/wset.bak".into(),
            capacity: 20,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("xyz = 999");
        assert!(parsed_config!(config_str => TestConfig; ttl_ms).is_err());
    }
}
