use std::collections::HashMap;

/// One bit-packed field in a [`MessageTemplate`].
///
/// `repeat` marks a field that belongs to the section group repeated
/// `N_ITER` times rather than a plain header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub bits: u8,
    pub repeat: bool,
}

impl FieldSpec {
    pub const fn field(name: &'static str, bits: u8) -> Self {
        Self { name, bits, repeat: false }
    }

    pub const fn repeated(name: &'static str, bits: u8) -> Self {
        Self { name, bits, repeat: true }
    }
}

/// A named, bit-packed record: fields in declaration order, default
/// values for any field an encoder omits, and the names of nested
/// sub-packet templates this template may carry.
///
/// `nid_packet` is set only for sub-packet templates (Packet 0/2/15); it
/// is the value the decoder peeks for in the alignment+lookahead rule of
/// §4.1. Top-level message templates instead carry `nid_message`, which
/// doubles as the template table's lookup key.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub name: &'static str,
    pub nid_message: Option<u8>,
    pub nid_packet: Option<u8>,
    pub fields: Vec<FieldSpec>,
    pub defaults: HashMap<&'static str, i64>,
    pub sub_packets: Vec<&'static str>,
}

impl MessageTemplate {
    pub fn repeated_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.repeat)
    }

    /// Non-repeat fields declared before the repeated section group,
    /// packed/unpacked first.
    pub fn header_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        let first_repeat = self.fields.iter().position(|f| f.repeat).unwrap_or(self.fields.len());
        self.fields[..first_repeat].iter()
    }

    /// Non-repeat fields declared after the repeated section group (an
    /// end-section block, e.g. `L_ENDSECTION`), packed/unpacked last.
    /// Empty for templates with no repeated group.
    pub fn trailer_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        let after_last_repeat = self.fields.iter().rposition(|f| f.repeat).map(|i| i + 1);
        match after_last_repeat {
            Some(start) => self.fields[start..].iter(),
            None => self.fields[self.fields.len()..].iter(),
        }
    }
}

/// The full set of known message and sub-packet templates, keyed two
/// ways: by `NID_MESSAGE` for top-level dispatch off the wire, and by
/// name for sub-packet lookup during recursive decode.
#[derive(Debug, Clone, Default)]
pub struct TemplateTable {
    by_nid: HashMap<u8, MessageTemplate>,
    by_name: HashMap<&'static str, MessageTemplate>,
}

impl TemplateTable {
    pub fn by_nid(&self, nid: u8) -> Option<&MessageTemplate> {
        self.by_nid.get(&nid)
    }

    pub fn by_name(&self, name: &str) -> Option<&MessageTemplate> {
        self.by_name.get(name)
    }

    fn insert_message(&mut self, t: MessageTemplate) {
        let nid = t.nid_message.expect("message template must carry NID_MESSAGE");
        self.by_name.insert(t.name, t.clone());
        self.by_nid.insert(nid, t);
    }

    fn insert_sub_packet(&mut self, t: MessageTemplate) {
        self.by_name.insert(t.name, t);
    }

    /// Builds the demonstrator's fixed template set, per spec §4.1/§4.8
    /// and the message identifiers listed in §6.
    pub fn standard() -> Self {
        let mut table = Self::default();

        table.insert_sub_packet(packet0_template());
        table.insert_sub_packet(packet2_template());
        table.insert_sub_packet(packet15_template());

        for t in [
            header_only(3, "ma", vec!["packet15"]),
            header_with_ref(8, "train_data_ack"),
            system_version_template(),
            header_only(38, "session_ack", vec![]),
            header_only(39, "termination_ack", vec![]),
            header_only(41, "train_accepted", vec![]),
            header_only(129, "train_data", vec!["packet2"]),
            ma_request_template(),
            header_only(136, "position_report", vec!["packet0"]),
            header_with_ref(146, "generic_ack"),
            header_only(150, "end_of_mission", vec![]),
            version_reject_template(),
            header_only(155, "session_establish", vec![]),
            header_only(156, "session_terminate", vec![]),
            header_only(157, "train_acceptance", vec!["packet0"]),
            header_only(159, "keys_auth", vec![]),
        ] {
            table.insert_message(t);
        }

        table
    }
}

fn envelope_fields() -> Vec<FieldSpec> {
    vec![FieldSpec::field("NID_MESSAGE", 8), FieldSpec::field("SEQUENCE", 16)]
}

fn header_only(nid: u8, name: &'static str, sub_packets: Vec<&'static str>) -> MessageTemplate {
    MessageTemplate {
        name,
        nid_message: Some(nid),
        nid_packet: None,
        fields: envelope_fields(),
        defaults: HashMap::from([("NID_MESSAGE", nid as i64)]),
        sub_packets,
    }
}

fn header_with_ref(nid: u8, name: &'static str) -> MessageTemplate {
    let mut fields = envelope_fields();
    fields.push(FieldSpec::field("NID_MESSAGE_REF", 8));
    MessageTemplate {
        name,
        nid_message: Some(nid),
        nid_packet: None,
        fields,
        defaults: HashMap::from([("NID_MESSAGE", nid as i64)]),
        sub_packets: vec![],
    }
}

fn system_version_template() -> MessageTemplate {
    let mut fields = envelope_fields();
    fields.push(FieldSpec::field("M_VERSION", 8));
    MessageTemplate {
        name: "system_version",
        nid_message: Some(32),
        nid_packet: None,
        fields,
        defaults: HashMap::from([("NID_MESSAGE", 32)]),
        sub_packets: vec![],
    }
}

fn version_reject_template() -> MessageTemplate {
    let mut fields = envelope_fields();
    fields.push(FieldSpec::field("M_VERSION", 8));
    MessageTemplate {
        name: "version_reject",
        nid_message: Some(154),
        nid_packet: None,
        fields,
        defaults: HashMap::from([("NID_MESSAGE", 154)]),
        sub_packets: vec![],
    }
}

fn ma_request_template() -> MessageTemplate {
    let mut fields = envelope_fields();
    fields.push(FieldSpec::field("Q_SCALE", 2));
    fields.push(FieldSpec::field("D_LRBG", 15));
    MessageTemplate {
        name: "ma_request",
        nid_message: Some(132),
        nid_packet: None,
        fields,
        defaults: HashMap::from([("NID_MESSAGE", 132), ("Q_SCALE", 1)]),
        sub_packets: vec![],
    }
}

fn packet0_template() -> MessageTemplate {
    MessageTemplate {
        name: "packet0",
        nid_message: None,
        nid_packet: Some(0),
        fields: vec![
            FieldSpec::field("NID_PACKET", 8),
            FieldSpec::field("Q_SCALE", 2),
            FieldSpec::field("D_LRBG", 15),
            FieldSpec::field("Q_DIRLRBG", 1),
        ],
        defaults: HashMap::from([("NID_PACKET", 0), ("Q_SCALE", 1), ("Q_DIRLRBG", 1)]),
        sub_packets: vec![],
    }
}

fn packet2_template() -> MessageTemplate {
    MessageTemplate {
        name: "packet2",
        nid_message: None,
        nid_packet: Some(2),
        fields: vec![FieldSpec::field("NID_PACKET", 8), FieldSpec::field("M_VERSION", 8)],
        defaults: HashMap::from([("NID_PACKET", 2)]),
        sub_packets: vec![],
    }
}

fn packet15_template() -> MessageTemplate {
    MessageTemplate {
        name: "packet15",
        nid_message: None,
        nid_packet: Some(15),
        fields: vec![
            FieldSpec::field("NID_PACKET", 8),
            FieldSpec::field("Q_DIR", 1),
            FieldSpec::field("N_ITER", 5),
            FieldSpec::repeated("L_SECTION", 16),
            FieldSpec::repeated("Q_SECTIONTIMER", 1),
            FieldSpec::repeated("T_SECTIONTIMER", 8),
            FieldSpec::repeated("D_SECTIONTIMERSTOPLOC", 16),
            FieldSpec::field("L_ENDSECTION", 16),
        ],
        defaults: HashMap::from([("NID_PACKET", 15)]),
        sub_packets: vec![],
    }
}
