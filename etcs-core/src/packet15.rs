//! Movement Authority (Packet 15) generation from a track topology, per
//! spec §4.8: walk the track list, collect sensors in encounter order,
//! and sum segment lengths between them into section records.

use etcs_types::{Packet15, SectionRecord, Topology};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Packet15Error {
    #[error("track path does not terminate at {expected}, found {found}")]
    PathMismatch { expected: String, found: String },
    #[error("track path is empty")]
    EmptyPath,
}

fn track_length(topology: &Topology, from: &str, to: &str) -> Option<f64> {
    topology.tracks.iter().find(|t| t.from == from && t.to == to).map(|t| t.length_m)
}

fn sensor_at(topology: &Topology, node: &str) -> Option<&str> {
    topology.sensors.iter().find(|s| s.node == node).map(|s| s.id.as_str())
}

/// Builds Packet 15 for a train traversing `track_ids` (an ordered list
/// of `from->to` node pairs already looked up from `topology.tracks`)
/// toward `st_to`, starting from `st_from`.
///
/// Returns `Packet15Error::PathMismatch` if `track_path` doesn't actually
/// terminate at `st_to` — a precondition the caller is expected to have
/// upheld when it assembled `track_path` from the topology.
pub fn generate_packet15(track_path: &[(String, String)], st_from: &str, st_to: &str, topology: &Topology) -> Result<Packet15, Packet15Error> {
    let Some((_, last_to)) = track_path.last() else {
        return Err(Packet15Error::EmptyPath);
    };
    if last_to != st_to {
        return Err(Packet15Error::PathMismatch { expected: st_to.to_string(), found: last_to.clone() });
    }

    let q_dir = if track_path.first().map(|(from, _)| from.as_str()) == Some(st_from) { 1 } else { 0 };

    // Step 1: walk the path, collecting each sensor once, in the order
    // its node is first encountered.
    let mut sensor_hits: Vec<(&str, usize)> = Vec::new();
    for (i, (_, to)) in track_path.iter().enumerate() {
        if let Some(sensor_id) = sensor_at(topology, to) {
            if !sensor_hits.iter().any(|(id, _)| *id == sensor_id) {
                sensor_hits.push((sensor_id, i));
            }
        }
    }

    // Step 3: sum lengths between consecutive sensor hits.
    let mut sections = Vec::new();
    for window in sensor_hits.windows(2) {
        let (_, start_idx) = window[0];
        let (_, end_idx) = window[1];
        let sum: f64 = track_path[(start_idx + 1)..=end_idx]
            .iter()
            .filter_map(|(from, to)| track_length(topology, from, to))
            .sum();
        sections.push(SectionRecord::zero_timers(sum.round() as i64));
    }

    // Step 4: end-section sum, from the last sensor to (and including)
    // the track touching `st_to`.
    let l_endsection = sensor_hits
        .last()
        .map(|(_, last_idx)| {
            track_path[(last_idx + 1)..]
                .iter()
                .filter_map(|(from, to)| track_length(topology, from, to))
                .sum::<f64>()
        })
        .unwrap_or(0.0);

    Ok(Packet15 { q_dir, sections, l_endsection: l_endsection.round() as i64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcs_types::{Sensor, Track};

    fn linear_topology() -> Topology {
        Topology {
            tracks: vec![
                Track { from: "A".into(), to: "B".into(), length_m: 100.0 },
                Track { from: "B".into(), to: "C".into(), length_m: 150.0 },
                Track { from: "C".into(), to: "D".into(), length_m: 200.0 },
                Track { from: "D".into(), to: "E".into(), length_m: 50.0 },
            ],
            sensors: vec![Sensor { id: "S1".into(), node: "B".into() }, Sensor { id: "S2".into(), node: "D".into() }],
            stations: vec![],
        }
    }

    fn path(topo: &Topology) -> Vec<(String, String)> {
        topo.tracks.iter().map(|t| (t.from.clone(), t.to.clone())).collect()
    }

    #[test]
    fn q_dir_is_one_when_walk_starts_at_st_from() {
        let topo = linear_topology();
        let p = generate_packet15(&path(&topo), "A", "E", &topo).unwrap();
        assert_eq!(p.q_dir, 1);
    }

    #[test]
    fn q_dir_is_zero_when_walk_does_not_start_at_st_from() {
        let topo = linear_topology();
        let p = generate_packet15(&path(&topo), "Z", "E", &topo).unwrap();
        assert_eq!(p.q_dir, 0);
    }

    #[test]
    fn sections_sum_lengths_between_consecutive_sensors() {
        let topo = linear_topology();
        let p = generate_packet15(&path(&topo), "A", "E", &topo).unwrap();
        // A->B (S1), B->C->D (S2): section length = 150 + 200 = 350
        assert_eq!(p.sections.len(), 1);
        assert_eq!(p.sections[0].l_section, 350);
        // end section: D->E = 50
        assert_eq!(p.l_endsection, 50);
        assert_eq!(p.n_iter(), 1);
    }

    #[test]
    fn path_not_ending_at_st_to_is_rejected() {
        let topo = linear_topology();
        let err = generate_packet15(&path(&topo), "A", "D", &topo).unwrap_err();
        assert_eq!(err, Packet15Error::PathMismatch { expected: "D".to_string(), found: "E".to_string() });
    }

    #[test]
    fn empty_path_is_rejected() {
        let topo = linear_topology();
        let err = generate_packet15(&[], "A", "E", &topo).unwrap_err();
        assert_eq!(err, Packet15Error::EmptyPath);
    }
}
