use serde::{Deserialize, Serialize};

use crate::fields::FieldValues;

/// One entry of the repeated section block inside a Movement Authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub l_section: i64,
    pub q_sectiontimer: i64,
    pub t_sectiontimer: i64,
    pub d_sectiontimerstoploc: i64,
}

impl SectionRecord {
    pub fn zero_timers(l_section: i64) -> Self {
        Self { l_section, q_sectiontimer: 0, t_sectiontimer: 0, d_sectiontimerstoploc: 0 }
    }
}

/// The Movement Authority sub-packet (Packet 15): header plus `N_ITER`
/// section records plus an end-section block. `N_ITER` is always
/// `sections.len()` — never stored independently, per spec §3's build-time
/// invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet15 {
    pub q_dir: u8,
    pub sections: Vec<SectionRecord>,
    pub l_endsection: i64,
}

impl Packet15 {
    pub fn n_iter(&self) -> usize {
        self.sections.len()
    }

    /// Reported packet length in bits, per spec §4.8 step 5. Descriptive
    /// only; the wire template's own field widths (see `etcs-core::codec`)
    /// are independent of this formula.
    pub fn l_packet_bits(&self) -> u32 {
        93 + 46 * self.n_iter() as u32
    }

    pub fn to_field_values(&self) -> FieldValues {
        let mut fv = FieldValues::new()
            .with_field("NID_PACKET", 15)
            .with_field("Q_DIR", self.q_dir as i64)
            .with_field("N_ITER", self.n_iter() as i64)
            .with_field("L_ENDSECTION", self.l_endsection);
        fv.sections = self
            .sections
            .iter()
            .map(|s| {
                std::collections::HashMap::from([
                    ("L_SECTION".to_string(), s.l_section),
                    ("Q_SECTIONTIMER".to_string(), s.q_sectiontimer),
                    ("T_SECTIONTIMER".to_string(), s.t_sectiontimer),
                    ("D_SECTIONTIMERSTOPLOC".to_string(), s.d_sectiontimerstoploc),
                ])
            })
            .collect();
        fv
    }

    pub fn from_field_values(fv: &FieldValues) -> Option<Self> {
        let q_dir = fv.get("Q_DIR")? as u8;
        let l_endsection = fv.get("L_ENDSECTION")?;
        let sections = fv
            .sections
            .iter()
            .map(|s| SectionRecord {
                l_section: *s.get("L_SECTION").unwrap_or(&0),
                q_sectiontimer: *s.get("Q_SECTIONTIMER").unwrap_or(&0),
                t_sectiontimer: *s.get("T_SECTIONTIMER").unwrap_or(&0),
                d_sectiontimerstoploc: *s.get("D_SECTIONTIMERSTOPLOC").unwrap_or(&0),
            })
            .collect();
        Some(Self { q_dir, sections, l_endsection })
    }
}

/// A directed track segment between two topology nodes, with a physical
/// length used by the section-length walk of spec §4.8.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub from: String,
    pub to: String,
    pub length_m: f64,
}

/// A balise/sensor fixed at one topology node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: String,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub node: String,
}

/// The trackside layout a Movement Authority is generated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub tracks: Vec<Track>,
    pub sensors: Vec<Sensor>,
    pub stations: Vec<Station>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l_packet_bits_matches_formula() {
        let p = Packet15 { q_dir: 1, sections: vec![SectionRecord::zero_timers(100); 3], l_endsection: 50 };
        assert_eq!(p.l_packet_bits(), 93 + 46 * 3);
    }

    #[test]
    fn field_values_round_trip() {
        let p = Packet15 {
            q_dir: 1,
            sections: vec![SectionRecord::zero_timers(100), SectionRecord::zero_timers(200)],
            l_endsection: 75,
        };
        let fv = p.to_field_values();
        let back = Packet15::from_field_values(&fv).unwrap();
        assert_eq!(p, back);
    }
}
