//! The trackside layout an RBC grants Movement Authorities against. The
//! demonstrator ships one fixed line; a real deployment would load this
//! from a topology file instead.

use etcs_types::{Sensor, Topology, Track};

pub fn default_topology() -> Topology {
    Topology {
        tracks: vec![
            Track { from: "A".into(), to: "B".into(), length_m: 1000.0 },
            Track { from: "B".into(), to: "C".into(), length_m: 1500.0 },
            Track { from: "C".into(), to: "D".into(), length_m: 1200.0 },
            Track { from: "D".into(), to: "E".into(), length_m: 900.0 },
        ],
        sensors: vec![
            Sensor { id: "S1".into(), node: "B".into() },
            Sensor { id: "S2".into(), node: "C".into() },
            Sensor { id: "S3".into(), node: "D".into() },
        ],
        stations: vec![],
    }
}

pub fn full_path(topology: &Topology) -> Vec<(String, String)> {
    topology.tracks.iter().map(|t| (t.from.clone(), t.to.clone())).collect()
}
