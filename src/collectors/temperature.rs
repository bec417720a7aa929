use super::{Probe, ProbeError, ProbeKind, Sample};
use crate::state::TemperatureSample;
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use sysinfo::{ComponentExt, System, SystemExt};

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub label: String,
    pub celsius: f64,
}

/// Readings of one chip or driver, e.g. `coretemp` or `nvme`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorGroup {
    pub name: String,
    pub readings: Vec<SensorReading>,
}

pub trait SensorSource: Send {
    fn groups(&mut self) -> Result<Vec<SensorGroup>, ProbeError>;
}

/// hwmon on Linux, sysinfo components everywhere else or when hwmon is empty.
pub struct PlatformSensors {
    system: System,
}

impl PlatformSensors {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    fn component_groups(&mut self) -> Vec<SensorGroup> {
        self.system.refresh_components_list();
        let mut groups: Vec<SensorGroup> = Vec::new();
        for component in self.system.components() {
            let celsius = component.temperature() as f64;
            if !celsius.is_finite() {
                continue;
            }
            let (name, label) = match component.label().trim().split_once(' ') {
                Some((name, label)) => (name.to_string(), label.to_string()),
                None => (component.label().trim().to_string(), String::new()),
            };
            let reading = SensorReading { label, celsius };
            match groups.iter_mut().find(|g| g.name == name) {
                Some(group) => group.readings.push(reading),
                None => groups.push(SensorGroup {
                    name,
                    readings: vec![reading],
                }),
            }
        }
        groups
    }
}

impl SensorSource for PlatformSensors {
    fn groups(&mut self) -> Result<Vec<SensorGroup>, ProbeError> {
        #[cfg(target_os = "linux")]
        {
            let groups = read_hwmon(Path::new("/sys/class/hwmon"));
            if !groups.is_empty() {
                return Ok(groups);
            }
        }
        Ok(self.component_groups())
    }
}

#[cfg(target_os = "linux")]
fn read_hwmon(root: &Path) -> Vec<SensorGroup> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };
    let mut dirs: Vec<_> = entries.flatten().map(|e| e.path()).collect();
    dirs.sort();

    let mut groups = Vec::new();
    for dir in dirs {
        let name = fs::read_to_string(dir.join("name"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| {
                dir.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default()
            });
        let Ok(files) = fs::read_dir(&dir) else {
            continue;
        };
        let mut inputs: Vec<(u32, String)> = files
            .flatten()
            .filter_map(|f| {
                let file = f.file_name().to_string_lossy().to_string();
                let index = file
                    .strip_prefix("temp")?
                    .strip_suffix("_input")?
                    .parse::<u32>()
                    .ok()?;
                Some((index, file))
            })
            .collect();
        if inputs.is_empty() {
            continue;
        }
        inputs.sort();

        let readings = inputs
            .into_iter()
            .filter_map(|(index, file)| {
                let raw = fs::read_to_string(dir.join(&file)).ok()?;
                let millis = raw.trim().parse::<f64>().ok()?;
                let label = fs::read_to_string(dir.join(format!("temp{index}_label")))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| format!("temp{index}"));
                Some(SensorReading {
                    label,
                    celsius: millis / 1000.0,
                })
            })
            .collect();
        groups.push(SensorGroup { name, readings });
    }
    groups
}

pub struct TemperatureProbe<S> {
    source: S,
}

impl<S: SensorSource> TemperatureProbe<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: SensorSource> Probe for TemperatureProbe<S> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Temperatures
    }

    fn sample(&mut self) -> Result<Sample, ProbeError> {
        let groups = self.source.groups()?;
        if groups.is_empty() {
            return Ok(Sample::Temperatures(TemperatureSample::Unavailable));
        }

        let mut flat = BTreeMap::new();
        for group in groups {
            for (i, reading) in group.readings.into_iter().enumerate() {
                let label = if reading.label.trim().is_empty() {
                    format!("temp{}", i + 1)
                } else {
                    reading.label
                };
                flat.insert(format!("{} {}", group.name, label), reading.celsius);
            }
        }
        Ok(Sample::Temperatures(TemperatureSample::Readings(flat)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Vec<SensorGroup>);

    impl SensorSource for Canned {
        fn groups(&mut self) -> Result<Vec<SensorGroup>, ProbeError> {
            Ok(self.0.clone())
        }
    }

    fn temps(sample: Sample) -> TemperatureSample {
        match sample {
            Sample::Temperatures(v) => v,
            other => panic!("unexpected sample {other:?}"),
        }
    }

    #[test]
    fn zero_groups_yield_sentinel() {
        let mut probe = TemperatureProbe::new(Canned(Vec::new()));
        assert_eq!(
            temps(probe.sample().expect("temps")),
            TemperatureSample::Unavailable
        );
    }

    #[test]
    fn flattens_group_and_label() {
        let mut probe = TemperatureProbe::new(Canned(vec![
            SensorGroup {
                name: "coretemp".to_string(),
                readings: vec![
                    SensorReading {
                        label: "Package id 0".to_string(),
                        celsius: 52.0,
                    },
                    SensorReading {
                        label: "Core 0".to_string(),
                        celsius: 49.0,
                    },
                ],
            },
            SensorGroup {
                name: "nvme".to_string(),
                readings: vec![SensorReading {
                    label: String::new(),
                    celsius: 38.85,
                }],
            },
        ]));

        let TemperatureSample::Readings(map) = temps(probe.sample().expect("temps")) else {
            panic!("expected readings");
        };
        assert_eq!(map.len(), 3);
        assert_eq!(map.get("coretemp Package id 0"), Some(&52.0));
        assert_eq!(map.get("coretemp Core 0"), Some(&49.0));
        assert_eq!(map.get("nvme temp1"), Some(&38.85));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn reads_hwmon_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let write = |rel: &str, body: &str| {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("dir");
            fs::write(path, body).expect("write");
        };
        write("hwmon0/name", "coretemp\n");
        write("hwmon0/temp1_input", "52000\n");
        write("hwmon0/temp1_label", "Package id 0\n");
        write("hwmon0/temp2_input", "49000\n");
        write("hwmon0/temp3_input", "n/a\n");
        write("hwmon1/name", "nvme\n");
        write("hwmon1/temp1_input", "38850\n");
        write("hwmon2/name", "acpi_fan\n");
        write("hwmon2/fan1_input", "1200\n");
        write("hwmon3/temp1_input", "41000\n");

        let groups = read_hwmon(root);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].name, "coretemp");
        assert_eq!(
            groups[0].readings,
            vec![
                SensorReading {
                    label: "Package id 0".to_string(),
                    celsius: 52.0,
                },
                SensorReading {
                    label: "temp2".to_string(),
                    celsius: 49.0,
                },
            ]
        );
        assert_eq!(groups[1].name, "nvme");
        assert_eq!(groups[1].readings[0].celsius, 38.85);
        assert_eq!(groups[2].name, "hwmon3");

        assert!(read_hwmon(&root.join("absent")).is_empty());
    }

    #[test]
    fn group_without_readings_is_not_the_sentinel() {
        let mut probe = TemperatureProbe::new(Canned(vec![SensorGroup {
            name: "acpitz".to_string(),
            readings: Vec::new(),
        }]));
        assert_eq!(
            temps(probe.sample().expect("temps")),
            TemperatureSample::Readings(BTreeMap::new())
        );
    }
}
