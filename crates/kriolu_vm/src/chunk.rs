use crate::object::Object;
use crate::opcode::Op;
use crate::value::Value;

/// Contenitore del bytecode di una singola funzione: byte di codice, una
/// riga sorgente per ogni byte (gli operandi replicano la riga del loro
/// opcode) e il pool di costanti.
pub struct Chunk {
    pub code: Vec<u8>,
    pub lines: Vec<u32>,
    pub constants: Vec<Value>,
}

impl Chunk {
    pub fn new() -> Self {
        Chunk { code: Vec::new(), lines: Vec::new(), constants: Vec::new() }
    }

    // ── Emit ──────────────────────────────────────────────────────────────

    pub fn emit(&mut self, op: Op, line: u32) -> usize {
        let offset = self.code.len();
        self.code.push(op as u8);
        self.lines.push(line);
        offset
    }

    pub fn emit_byte(&mut self, byte: u8, line: u32) {
        self.code.push(byte);
        self.lines.push(line);
    }

    /// Emette un salto in avanti con operando segnaposto; restituisce
    /// l'offset dell'operando da patchare.
    pub fn emit_jump(&mut self, op: Op, line: u32) -> usize {
        self.emit(op, line);
        let operand = self.code.len();
        self.emit_byte(0xFF, line);
        self.emit_byte(0xFF, line);
        operand
    }

    /// Scrive l'offset reale in un salto emesso con `emit_jump`.
    /// `false` se la distanza non sta in 16 bit.
    pub fn patch_jump(&mut self, operand: usize) -> bool {
        let distance = self.code.len() - operand - 2;
        if distance > u16::MAX as usize {
            return false;
        }
        self.code[operand] = (distance >> 8) as u8;
        self.code[operand + 1] = (distance & 0xFF) as u8;
        true
    }

    /// Emette un salto all'indietro verso `loop_start`.
    /// `false` se la distanza non sta in 16 bit.
    pub fn emit_loop(&mut self, loop_start: usize, line: u32) -> bool {
        self.emit(Op::Loop, line);
        // +2: l'ip della VM sarà oltre i due byte di operando.
        let distance = self.code.len() + 2 - loop_start;
        if distance > u16::MAX as usize {
            return false;
        }
        self.emit_byte((distance >> 8) as u8, line);
        self.emit_byte((distance & 0xFF) as u8, line);
        true
    }

    // ── Pool di costanti ──────────────────────────────────────────────────

    /// Aggiunge una costante (deduplicando) e restituisce l'indice.
    pub fn add_constant(&mut self, value: Value) -> usize {
        for (i, existing) in self.constants.iter().enumerate() {
            if constants_equal(existing, &value) {
                return i;
            }
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    /// Aggiunge una costante ed emette il push, in forma corta o lunga a
    /// seconda dell'indice. `false` se il pool supera i 24 bit.
    pub fn emit_constant(&mut self, value: Value, line: u32) -> bool {
        let index = self.add_constant(value);
        if index <= u8::MAX as usize {
            self.emit(Op::PushConstant, line);
            self.emit_byte(index as u8, line);
        } else if index < (1 << 24) {
            self.emit(Op::PushConstantLong, line);
            self.emit_byte((index >> 16) as u8, line);
            self.emit_byte((index >> 8) as u8, line);
            self.emit_byte(index as u8, line);
        } else {
            return false;
        }
        true
    }

    pub fn line_at(&self, offset: usize) -> u32 {
        self.lines.get(offset).copied().unwrap_or(0)
    }

    // ── Disassembler ──────────────────────────────────────────────────────

    pub fn disassemble(&self, name: &str) -> String {
        let mut out = format!("=== {} ===\n", name);
        let mut offset = 0;
        while offset < self.code.len() {
            offset = self.disassemble_instruction(&mut out, offset);
        }
        out
    }

    fn disassemble_instruction(&self, out: &mut String, offset: usize) -> usize {
        use std::fmt::Write;

        let byte = self.code[offset];
        let Some(op) = Op::from_u8(byte) else {
            let _ = writeln!(out, "{:04}  ??  bad opcode {}", offset, byte);
            return offset + 1;
        };
        let _ = write!(out, "{:04} {:4}  {:<16}", offset, self.line_at(offset), format!("{:?}", op));

        match op {
            Op::PushConstant | Op::DefineGlobal | Op::ReadGlobal | Op::AssignGlobal
            | Op::Class | Op::Method | Op::GetProperty | Op::SetProperty | Op::GetSuper => {
                let idx = self.code[offset + 1] as usize;
                let _ = write!(out, "  #{} {}", idx, self.constant_text(idx));
            }
            Op::PushConstantLong => {
                let idx = self.read_u24(offset + 1);
                let _ = write!(out, "  #{} {}", idx, self.constant_text(idx));
            }
            Op::LocalRead | Op::LocalWrite | Op::CapturedRead | Op::CapturedWrite
            | Op::Call | Op::CallClass | Op::Interpolate => {
                let _ = write!(out, "  {}", self.code[offset + 1]);
            }
            Op::Invoke | Op::InvokeSuper => {
                let idx = self.code[offset + 1] as usize;
                let argc = self.code[offset + 2];
                let _ = write!(out, "  #{} {} ({} args)", idx, self.constant_text(idx), argc);
            }
            Op::Jump | Op::JumpIfFalse => {
                let distance = self.read_u16(offset + 1) as usize;
                let _ = write!(out, "  +{} → {}", distance, offset + 3 + distance);
            }
            Op::Loop => {
                let distance = self.read_u16(offset + 1) as usize;
                let _ = write!(out, "  -{} → {}", distance, offset + 3 - distance);
            }
            Op::MakeClosure => {
                let idx = self.code[offset + 1] as usize;
                let _ = write!(out, "  #{} {}", idx, self.constant_text(idx));
                // Le coppie di cattura seguono l'operando: lunghezza dettata
                // dalla funzione bersaglio.
                let count = self.closure_capture_count(idx);
                let mut at = offset + 2;
                for _ in 0..count {
                    let location = self.code[at];
                    let index = self.code[at + 1];
                    let kind = if location == 1 { "stack" } else { "heap" };
                    let _ = write!(out, "\n{:23}| capture {} {}", "", kind, index);
                    at += 2;
                }
                out.push('\n');
                return at;
            }
            _ => {}
        }
        out.push('\n');
        offset + 1 + op.operand_bytes()
    }

    fn constant_text(&self, idx: usize) -> String {
        match self.constants.get(idx) {
            Some(v) => format!("{}", v),
            None => "?".to_string(),
        }
    }

    fn closure_capture_count(&self, constant_idx: usize) -> usize {
        match self.constants.get(constant_idx) {
            Some(Value::Object(Object::Function(f))) => f.heap_value_count,
            _ => 0,
        }
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        ((self.code[offset] as u16) << 8) | self.code[offset + 1] as u16
    }

    pub fn read_u24(&self, offset: usize) -> usize {
        ((self.code[offset] as usize) << 16)
            | ((self.code[offset + 1] as usize) << 8)
            | self.code[offset + 2] as usize
    }
}

impl Default for Chunk {
    fn default() -> Self { Self::new() }
}

/// Uguaglianza per la deduplicazione del pool: i numeri si confrontano per
/// bit (niente collasso 0.0/-0.0), gli oggetti per identità di handle.
fn constants_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}
