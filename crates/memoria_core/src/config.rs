use std::path::PathBuf;

use log::LevelFilter;
use sim_common::logging::level_from_config;
use sim_common::{ConfigError, ConfigFile, PagingGeometry};

/// Memoria settings read from its config file.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoriaConfig {
    pub listen_port: u16,
    pub memory_size: u32,
    pub page_size: u32,
    pub entries_per_table: u32,
    pub levels: u32,
    pub memory_delay_ms: u64,
    pub swapfile_path: PathBuf,
    pub swap_delay_ms: u64,
    pub log_level: LevelFilter,
    pub dump_path: PathBuf,
    pub instructions_path: PathBuf,
}

impl MemoriaConfig {
    /// Builds the settings from a parsed config file.
    pub fn from_file(config: &ConfigFile) -> Result<Self, ConfigError> {
        let parsed = Self {
            listen_port: config.get("PUERTO_ESCUCHA")?,
            memory_size: config.get("TAM_MEMORIA")?,
            page_size: config.get("TAM_PAGINA")?,
            entries_per_table: config.get("ENTRADAS_POR_TABLA")?,
            levels: config.get("CANTIDAD_NIVELES")?,
            memory_delay_ms: config.get_or("RETARDO_MEMORIA", 0)?,
            swapfile_path: config.get_or("PATH_SWAPFILE", PathBuf::from("swapfile.bin"))?,
            swap_delay_ms: config.get_or("RETARDO_SWAP", 0)?,
            log_level: level_from_config(config)?,
            dump_path: config.get_or("DUMP_PATH", PathBuf::from("."))?,
            instructions_path: config.get_or("PATH_INSTRUCCIONES", PathBuf::new())?,
        };
        for (key, value) in [
            ("TAM_PAGINA", parsed.page_size),
            ("ENTRADAS_POR_TABLA", parsed.entries_per_table),
            ("CANTIDAD_NIVELES", parsed.levels),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if !parsed.geometry().is_addressable() {
            return Err(ConfigError::InvalidValue {
                key: "CANTIDAD_NIVELES".to_string(),
                value: parsed.levels.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Returns the paging geometry announced to CPUs.
    pub fn geometry(&self) -> PagingGeometry {
        PagingGeometry::new(self.page_size, self.entries_per_table, self.levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "PUERTO_ESCUCHA=8002\nTAM_MEMORIA=4096\nTAM_PAGINA=64\nENTRADAS_POR_TABLA=4\nCANTIDAD_NIVELES=3\nRETARDO_MEMORIA=1500\nLOG_LEVEL=TRACE\nDUMP_PATH=/tmp/dump_files/\nPATH_INSTRUCCIONES=/home/utnso/scripts\n";

    #[test]
    fn from_file_reads_every_key() {
        let file = ConfigFile::parse(SAMPLE).expect("config should parse");
        let config = MemoriaConfig::from_file(&file).expect("config should be valid");
        assert_eq!(config.listen_port, 8002);
        assert_eq!(config.geometry(), PagingGeometry::new(64, 4, 3));
        assert_eq!(config.memory_delay_ms, 1500);
        assert_eq!(config.swap_delay_ms, 0);
        assert_eq!(config.log_level, LevelFilter::Trace);
        assert_eq!(config.dump_path, PathBuf::from("/tmp/dump_files/"));
        assert_eq!(config.instructions_path, PathBuf::from("/home/utnso/scripts"));
    }

    #[test]
    fn zero_geometry_is_rejected() {
        let file = ConfigFile::parse(&SAMPLE.replace("TAM_PAGINA=64", "TAM_PAGINA=0"))
            .expect("config should parse");
        assert!(MemoriaConfig::from_file(&file).is_err());
    }

    #[test]
    fn geometry_too_deep_to_count_is_rejected() {
        let file = ConfigFile::parse(
            &SAMPLE
                .replace("ENTRADAS_POR_TABLA=4", "ENTRADAS_POR_TABLA=65536")
                .replace("CANTIDAD_NIVELES=3", "CANTIDAD_NIVELES=5"),
        )
        .expect("config should parse");
        assert_eq!(
            MemoriaConfig::from_file(&file),
            Err(ConfigError::InvalidValue {
                key: "CANTIDAD_NIVELES".to_string(),
                value: "5".to_string()
            })
        );
    }

    #[test]
    fn missing_port_is_reported() {
        let file = ConfigFile::parse("TAM_MEMORIA=4096").expect("config should parse");
        assert_eq!(
            MemoriaConfig::from_file(&file),
            Err(ConfigError::MissingKey("PUERTO_ESCUCHA".to_string()))
        );
    }
}
