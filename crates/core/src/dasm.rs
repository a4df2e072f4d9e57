//! Instruction disassembly.
//!
//! Decoding walks a tree: branch nodes dispatch on one of the F, J, or A
//! subfields, leaves carry a mnemonic and rendering metadata. Separate
//! trees are rooted for basic and extended mode. An instruction word with
//! no matching entry renders as twelve octal digits.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::instruction::InstructionWord;
use crate::state::{A0, R0};

/// Role of the A field in rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AFieldUsage {
    ARegister,
    BRegister,
    RRegister,
    XRegister,
    FunctionDiscriminator,
    Unused,
}

/// Role of the J field in rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JFieldUsage {
    PartialWordDesignator,
    FunctionDiscriminator,
    Unused,
}

/// Subfield a branch node dispatches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    F,
    J,
    A,
}

/// One decodable instruction.
#[derive(Clone, Copy, Debug)]
pub struct Leaf {
    mnemonic: &'static str,
    a_field: AFieldUsage,
    j_field: JFieldUsage,
    u_is_18_bits: bool,
    no_grs_address: bool,
}

impl Leaf {
    const fn new(mnemonic: &'static str, a_field: AFieldUsage) -> Self {
        Self {
            mnemonic,
            a_field,
            j_field: JFieldUsage::PartialWordDesignator,
            u_is_18_bits: false,
            no_grs_address: false,
        }
    }

    const fn j_discriminated(mnemonic: &'static str, a_field: AFieldUsage) -> Self {
        Self {
            mnemonic,
            a_field,
            j_field: JFieldUsage::FunctionDiscriminator,
            u_is_18_bits: false,
            no_grs_address: false,
        }
    }

}

/// A decode-tree node.
pub enum Node {
    Leaf(Leaf),
    Branch { axis: Axis, table: HashMap<u64, Node> },
}

const J_FIELD_THIRD_WORD: [&str; 16] = [
    "W", "H2", "H1", "XH2", "XH1", "T3", "T2", "T1", "S6", "S5", "S4", "S3", "S2", "S1", "U", "XU",
];

const J_FIELD_QUARTER_WORD: [&str; 16] = [
    "W", "H2", "H1", "XH2", "Q2", "Q4", "Q3", "Q1", "S6", "S5", "S4", "S3", "S2", "S1", "U", "XU",
];

fn store_constant_family() -> Node {
    let mut table = HashMap::new();
    let names = ["SZ", "SNZ", "SP1", "SN1", "SFS", "SFZ", "SAS", "SAZ"];
    for (a, name) in names.iter().enumerate() {
        table.insert(
            a as u64,
            Node::Leaf(Leaf::new(name, AFieldUsage::FunctionDiscriminator)),
        );
    }
    Node::Branch { axis: Axis::A, table }
}

fn j_family(entries: &[(u64, &'static str, AFieldUsage)]) -> Node {
    let mut table = HashMap::new();
    for &(j, mnemonic, a_field) in entries {
        table.insert(j, Node::Leaf(Leaf::j_discriminated(mnemonic, a_field)));
    }
    Node::Branch { axis: Axis::J, table }
}

fn common_entries(table: &mut HashMap<u64, Node>) {
    use AFieldUsage::{ARegister, RRegister, XRegister};

    table.insert(0o01, Node::Leaf(Leaf::new("SA", ARegister)));
    table.insert(0o02, Node::Leaf(Leaf::new("SNA", ARegister)));
    table.insert(0o03, Node::Leaf(Leaf::new("SMA", ARegister)));
    table.insert(0o04, Node::Leaf(Leaf::new("SR", RRegister)));
    table.insert(0o05, store_constant_family());
    table.insert(
        0o06,
        Node::Leaf(Leaf::new("SX", XRegister)),
    );
    table.insert(
        0o07,
        j_family(&[(0o04, "LAQW", ARegister), (0o05, "SAQW", ARegister)]),
    );
    table.insert(0o10, Node::Leaf(Leaf::new("LA", ARegister)));
    table.insert(0o11, Node::Leaf(Leaf::new("LNA", ARegister)));
    table.insert(0o12, Node::Leaf(Leaf::new("LMA", ARegister)));
    table.insert(0o13, Node::Leaf(Leaf::new("LNMA", ARegister)));
    table.insert(0o23, Node::Leaf(Leaf::new("LR", RRegister)));
    table.insert(0o26, Node::Leaf(Leaf::new("LXM", XRegister)));
    table.insert(0o27, Node::Leaf(Leaf::new("LX", XRegister)));
    table.insert(0o46, Node::Leaf(Leaf::new("LXI", XRegister)));
    table.insert(
        0o71,
        j_family(&[
            (0o12, "DS", ARegister),
            (0o13, "DL", ARegister),
            (0o14, "DLN", ARegister),
            (0o15, "DLM", ARegister),
        ]),
    );
    table.insert(
        0o72,
        j_family(&[(0o16, "SRS", ARegister), (0o17, "LRS", ARegister)]),
    );
    table.insert(0o75, j_family(&[(0o13, "LXLM", XRegister)]));
}

fn basic_tree() -> &'static Node {
    static TREE: OnceLock<Node> = OnceLock::new();
    TREE.get_or_init(|| {
        let mut table = HashMap::new();
        common_entries(&mut table);
        Node::Branch { axis: Axis::F, table }
    })
}

fn extended_tree() -> &'static Node {
    static TREE: OnceLock<Node> = OnceLock::new();
    TREE.get_or_init(|| {
        use AFieldUsage::XRegister;
        let mut table = HashMap::new();
        common_entries(&mut table);
        table.insert(0o51, Node::Leaf(Leaf::new("LXSI", XRegister)));
        table.insert(0o60, Node::Leaf(Leaf::new("LSBO", XRegister)));
        table.insert(0o61, Node::Leaf(Leaf::new("LSBL", XRegister)));
        Node::Branch { axis: Axis::F, table }
    })
}

fn render_grs_operand(value: u64) -> Option<String> {
    if value < A0 {
        Some(format!("X{value}"))
    } else if value < A0 + 16 {
        Some(format!("A{}", value - A0))
    } else if (R0..R0 + 16).contains(&value) {
        Some(format!("R{}", value - R0))
    } else {
        None
    }
}

fn render_leaf(
    leaf: &Leaf,
    iw: InstructionWord,
    basic_mode: bool,
    quarter_word_mode: bool,
) -> String {
    let mut text = leaf.mnemonic.to_string();
    if leaf.j_field == JFieldUsage::PartialWordDesignator {
        let tokens = if quarter_word_mode {
            &J_FIELD_QUARTER_WORD
        } else {
            &J_FIELD_THIRD_WORD
        };
        text.push(',');
        text.push_str(tokens[iw.j() as usize]);
    }
    let mut text = format!("{text:<10}");

    match leaf.a_field {
        AFieldUsage::ARegister => text.push_str(&format!("A{},", iw.a())),
        AFieldUsage::BRegister => text.push_str(&format!("B{},", iw.a())),
        AFieldUsage::RRegister => text.push_str(&format!("R{},", iw.a())),
        AFieldUsage::XRegister => text.push_str(&format!("X{},", iw.a())),
        AFieldUsage::FunctionDiscriminator | AFieldUsage::Unused => {}
    }

    // Operand, optional index register, optional base register. Trailing
    // empty fields are trimmed.
    let mut fields: Vec<String> = Vec::new();

    let mut operand = String::new();
    let indirect = basic_mode && iw.i() > 0;
    if indirect {
        operand.push('*');
    }
    let value = if basic_mode {
        iw.u()
    } else if leaf.u_is_18_bits {
        iw.hiu()
    } else {
        iw.d()
    };
    // Immediate operands (j of U or XU) are values, not addresses.
    let immediate =
        leaf.j_field == JFieldUsage::PartialWordDesignator && iw.j() >= 0o16;
    let grs_name = if leaf.no_grs_address || indirect || immediate {
        None
    } else {
        render_grs_operand(value)
    };
    match grs_name {
        Some(name) => operand.push_str(&name),
        None => operand.push_str(&format!("0{value:o}")),
    }
    fields.push(operand);

    if iw.x() > 0 {
        let star = if iw.h() > 0 { "*" } else { "" };
        fields.push(format!("{star}X{}", iw.x()));
    } else {
        fields.push(String::new());
    }

    if !basic_mode {
        fields.push(format!("B{}", iw.b()));
    }

    while fields.last().is_some_and(String::is_empty) {
        fields.pop();
    }
    text.push_str(&fields.join(","));
    text
}

/// Decodes one instruction word. Returns the rendered text and whether the
/// word matched a known instruction.
#[must_use]
pub fn interpret(
    iw: InstructionWord,
    basic_mode: bool,
    quarter_word_mode: bool,
) -> (String, bool) {
    let mut node = if basic_mode {
        basic_tree()
    } else {
        extended_tree()
    };

    loop {
        match node {
            Node::Leaf(leaf) => {
                return (render_leaf(leaf, iw, basic_mode, quarter_word_mode), true);
            }
            Node::Branch { axis, table } => {
                let key = match axis {
                    Axis::F => iw.f(),
                    Axis::J => iw.j(),
                    Axis::A => iw.a(),
                };
                match table.get(&key) {
                    Some(next) => node = next,
                    None => return (format!("{:012o}", iw.w()), false),
                }
            }
        }
    }
}
