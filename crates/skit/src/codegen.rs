//! The code generator.
//!
//! [`Emitter`] is the façade an external parser drives: one method per
//! grammar production, each appending the instruction sequence for that
//! construct to the program under construction. The emitter never sees
//! tokens or an AST — it only reacts to semantic events, resolves
//! identifiers through its symbol tables, and hands back finished
//! [`Program`]s for the program pool.
//!
//! Per object the emitter builds one initializer program (wrapped in the
//! header/footer pair that primes the object's heap) plus one program per
//! function; `begin_function`/`end_function` bracket the latter while the
//! initializer is set aside.

use std::mem;

use crate::bytecode::{Label, Opcode, Operand, Program};
use crate::error::{Error, Result};
use crate::heap::HeapPtr;
use crate::symtable::SymTable;

const T0: Operand = Operand::U(0);
const T1: Operand = Operand::U(1);
const T2: Operand = Operand::U(2);
const T3: Operand = Operand::U(3);
const NONE: Operand = Operand::U(0);

/// Parser-driven bytecode emitter for one object declaration.
pub struct Emitter {
    object_name: String,
    program: Program,
    table: SymTable,
    /// The initializer program, parked while a function body is open.
    stashed: Option<Program>,
    /// Index of the open function's prologue placeholder.
    fun_header: usize,
}

impl Emitter {
    /// Start emitting programs for the object type `object_name`. The
    /// current program is the object initializer until `begin_function`
    /// opens a function body.
    pub fn new(object_name: &str) -> Self {
        Self {
            object_name: object_name.to_string(),
            program: Program::new(0),
            table: SymTable::new(),
            stashed: None,
            fun_header: 0,
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Allocate a label in the program under construction.
    pub fn new_label(&mut self) -> Label {
        self.program.new_label()
    }

    /// Place a label at the next emitted instruction.
    pub fn place_label(&mut self, label: Label) {
        self.program.place_label(label);
    }

    // -----------------------------------------------------------------------
    // Object initializer
    // -----------------------------------------------------------------------

    /// Open the initializer: jump over the body to the priming loop.
    pub fn object_header(&mut self) -> (Label, Label) {
        let start = self.new_label();
        let end = self.new_label();
        self.program.emit(Opcode::Jmp, Operand::U(end), NONE);
        self.place_label(start);
        (start, end)
    }

    /// Close the initializer: allocate one heap cell per recorded field,
    /// then run the body.
    pub fn object_footer(&mut self, start: Label, end: Label) {
        let alloc_loop = self.new_label();
        self.program.emit(Opcode::Ret, NONE, NONE);
        self.place_label(end);
        self.program
            .emit(Opcode::MovNum, T2, Operand::F(self.table.count() as f32));
        self.place_label(alloc_loop);
        self.program.emit(Opcode::Je, Operand::U(start), NONE);
        self.program.emit(Opcode::Alloc, NONE, NONE);
        self.program.emit(Opcode::Dec, T2, NONE);
        self.program.emit(Opcode::Jmp, Operand::U(alloc_loop), NONE);
    }

    /// Declare an object field and store the initializer value (in T0)
    /// into its heap cell.
    pub fn declare_var(&mut self, identifier: &str) {
        if !self.table.has_symbol(identifier) {
            let address = self.table.count() as HeapPtr;
            self.table.put_heap_symbol(identifier, address);
        }
        self.table.emit_write(identifier, &mut self.program, 0);
    }

    /// Seal and return the initializer program. Call last, after every
    /// function has been closed with `end_function`.
    pub fn finish(mut self) -> Result<Program> {
        self.program.finalize()?;
        Ok(self.program)
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Assign T0 to `identifier` with `=`, `+=`, `-=`, `*=` or `/=`
    /// (`op` is the operator's first character). First assignment to an
    /// unknown name declares a local.
    pub fn assign(&mut self, op: char, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_parent() {
            return Err(Error::AttributionOutsideFunction {
                name: identifier.to_string(),
                line,
            });
        }
        if !self.table.has_symbol(identifier) {
            let offset = self.table.count() as i32 - self.program.arity() as i32;
            self.table.put_stack_symbol(identifier, offset);
        }

        match op {
            '=' => {
                self.table.emit_write(identifier, &mut self.program, 0);
            }
            '+' => {
                let cat = self.new_label();
                let end = self.new_label();
                self.table.emit_read(identifier, &mut self.program, 1);
                self.program.emit(Opcode::TypeCheckStr, T1, NONE);
                self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                self.program.emit(Opcode::TypeCheckStr, T0, NONE);
                self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                self.program.emit(Opcode::Add, T1, T0);
                self.program.emit(Opcode::Jmp, Operand::U(end), NONE);
                self.place_label(cat);
                self.program.emit(Opcode::Concat, T1, T0);
                self.place_label(end);
                self.table.emit_write(identifier, &mut self.program, 1);
                self.program.emit(Opcode::Xchg, T0, T1);
            }
            '-' | '*' | '/' => {
                let arith = match op {
                    '-' => Opcode::Sub,
                    '*' => Opcode::Mul,
                    _ => Opcode::Div,
                };
                self.table.emit_read(identifier, &mut self.program, 1);
                self.program.emit(arith, T1, T0);
                self.table.emit_write(identifier, &mut self.program, 1);
                self.program.emit(Opcode::Xchg, T0, T1);
            }
            _ => unreachable!("unknown assignment operator {op}"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ternary and short-circuit expressions
    // -----------------------------------------------------------------------

    /// `cond ? a : b`, phase 1 — after the condition is in T0.
    pub fn ternary_test(&mut self, nope: Label) {
        self.program.emit(Opcode::Test, T0, T0);
        self.program.emit(Opcode::Je, Operand::U(nope), NONE);
    }

    /// Phase 2 — between the two branches.
    pub fn ternary_else(&mut self, nope: Label, done: Label) {
        self.program.emit(Opcode::Jmp, Operand::U(done), NONE);
        self.place_label(nope);
    }

    /// Phase 3 — after the second branch.
    pub fn ternary_end(&mut self, done: Label) {
        self.place_label(done);
    }

    /// `a || b` after the left operand: skip the right operand when T0
    /// is already truthy.
    pub fn logical_or(&mut self, done: Label) {
        self.program.emit(Opcode::Test, T0, T0);
        self.program.emit(Opcode::Jne, Operand::U(done), NONE);
    }

    /// `a && b` after the left operand: skip the right operand when T0
    /// is already falsy.
    pub fn logical_and(&mut self, done: Label) {
        self.program.emit(Opcode::Test, T0, T0);
        self.program.emit(Opcode::Je, Operand::U(done), NONE);
    }

    pub fn logical_end(&mut self, done: Label) {
        self.place_label(done);
    }

    // -----------------------------------------------------------------------
    // Binary expressions
    // -----------------------------------------------------------------------

    /// `a == b` / `a != b`, phase 1 — save the left operand.
    pub fn equality_begin(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Phase 2 — right operand in T0; leave the boolean in T0.
    pub fn equality_end(&mut self, op: &str) {
        let done = self.new_label();
        self.program.emit(Opcode::Pop, T1, NONE);
        self.program.emit(Opcode::Cmp, T1, T0);
        self.program.emit(Opcode::MovBool, T0, Operand::B(true));
        let jump = if op == "==" { Opcode::Je } else { Opcode::Jne };
        self.program.emit(jump, Operand::U(done), NONE);
        self.program.emit(Opcode::MovBool, T0, Operand::B(false));
        self.place_label(done);
    }

    /// `a < b` and friends, phase 1 — save the left operand.
    pub fn relational_begin(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Phase 2 — right operand in T0; leave the boolean in T0.
    pub fn relational_end(&mut self, op: &str) {
        let done = self.new_label();
        self.program.emit(Opcode::Pop, T1, NONE);
        self.program.emit(Opcode::Cmp, T1, T0);
        self.program.emit(Opcode::MovBool, T0, Operand::B(true));
        let jump = match op {
            ">=" => Opcode::Jge,
            ">" => Opcode::Jg,
            "<" => Opcode::Jl,
            _ => Opcode::Jle,
        };
        self.program.emit(jump, Operand::U(done), NONE);
        self.program.emit(Opcode::MovBool, T0, Operand::B(false));
        self.place_label(done);
    }

    /// `a + b` / `a - b`, phase 1 — save the left operand.
    pub fn additive_begin(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Phase 2. `+` concatenates when either side is a string, decided
    /// at runtime through a type probe.
    pub fn additive_end(&mut self, op: char) {
        self.program.emit(Opcode::Pop, T1, NONE);
        match op {
            '+' => {
                let cat = self.new_label();
                let end = self.new_label();
                self.program.emit(Opcode::TypeCheckStr, T1, NONE);
                self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                self.program.emit(Opcode::TypeCheckStr, T0, NONE);
                self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                self.program.emit(Opcode::Add, T0, T1);
                self.program.emit(Opcode::Jmp, Operand::U(end), NONE);
                self.place_label(cat);
                self.program.emit(Opcode::Concat, T1, T0);
                self.program.emit(Opcode::Xchg, T1, T0);
                self.place_label(end);
            }
            _ => {
                self.program.emit(Opcode::Sub, T1, T0);
                self.program.emit(Opcode::Xchg, T1, T0);
            }
        }
    }

    /// `a * b` / `a / b`, phase 1 — save the left operand.
    pub fn multiplicative_begin(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Phase 2.
    pub fn multiplicative_end(&mut self, op: char) {
        self.program.emit(Opcode::Pop, T1, NONE);
        match op {
            '*' => {
                self.program.emit(Opcode::Mul, T0, T1);
            }
            _ => {
                self.program.emit(Opcode::Div, T1, T0);
                self.program.emit(Opcode::Xchg, T1, T0);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Unary expressions
    // -----------------------------------------------------------------------

    /// Unary minus on T0.
    pub fn unary_minus(&mut self) {
        self.program.emit(Opcode::Neg, T0, T0);
    }

    /// Boolean negation of T0.
    pub fn unary_not(&mut self) {
        self.program.emit(Opcode::LogicalNot, T0, T0);
    }

    /// `typeof` probe ladder: leaves one of "number", "string",
    /// "object", "boolean", "null" in T0.
    pub fn unary_typeof(&mut self) {
        let not_number = self.new_label();
        let not_string = self.new_label();
        let not_object = self.new_label();
        let not_boolean = self.new_label();
        let end = self.new_label();

        let number = self.program.add_text("number");
        let string = self.program.add_text("string");
        let object = self.program.add_text("object");
        let boolean = self.program.add_text("boolean");
        let null = self.program.add_text("null");

        self.program.emit(Opcode::TypeCheckNum, T0, NONE);
        self.program.emit(Opcode::Jne, Operand::U(not_number), NONE);
        self.program.emit(Opcode::MovStr, T0, Operand::U(number));
        self.program.emit(Opcode::Jmp, Operand::U(end), NONE);

        self.place_label(not_number);
        self.program.emit(Opcode::TypeCheckStr, T0, NONE);
        self.program.emit(Opcode::Jne, Operand::U(not_string), NONE);
        self.program.emit(Opcode::MovStr, T0, Operand::U(string));
        self.program.emit(Opcode::Jmp, Operand::U(end), NONE);

        self.place_label(not_string);
        self.program.emit(Opcode::TypeCheckObj, T0, NONE);
        self.program.emit(Opcode::Jne, Operand::U(not_object), NONE);
        self.program.emit(Opcode::MovStr, T0, Operand::U(object));
        self.program.emit(Opcode::Jmp, Operand::U(end), NONE);

        self.place_label(not_object);
        self.program.emit(Opcode::TypeCheckBool, T0, NONE);
        self.program.emit(Opcode::Jne, Operand::U(not_boolean), NONE);
        self.program.emit(Opcode::MovStr, T0, Operand::U(boolean));
        self.program.emit(Opcode::Jmp, Operand::U(end), NONE);

        self.place_label(not_boolean);
        self.program.emit(Opcode::MovStr, T0, Operand::U(null));

        self.place_label(end);
    }

    /// Pre-increment / pre-decrement: mutate, then yield the new value.
    pub fn pre_incdec(&mut self, op: &str, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }
        self.table.emit_read(identifier, &mut self.program, 0);
        let step = if op == "++" { Opcode::Inc } else { Opcode::Dec };
        self.program.emit(step, T0, NONE);
        self.table.emit_write(identifier, &mut self.program, 0);
        Ok(())
    }

    /// Post-increment / post-decrement: yield the original value, write
    /// the mutated one.
    pub fn post_incdec(&mut self, op: &str, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }
        self.table.emit_read(identifier, &mut self.program, 0);
        self.program.emit(Opcode::Mov, T1, T0);
        let step = if op == "++" { Opcode::Inc } else { Opcode::Dec };
        self.program.emit(step, T1, NONE);
        self.table.emit_write(identifier, &mut self.program, 1);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    /// Open a plain call: the receiver is the executing object.
    pub fn call_self_begin(&mut self) {
        self.program.emit(Opcode::MovThis, T1, NONE);
        self.program.emit(Opcode::Push, T1, NONE);
    }

    /// Open a member call on the object bound to `identifier`.
    pub fn call_object_begin(&mut self, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }
        self.table.emit_read(identifier, &mut self.program, 1);
        self.program.emit(Opcode::Push, T1, NONE);
        Ok(())
    }

    /// Push an evaluated argument (in T0).
    pub fn push_param(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Emit the call itself; the return value lands in T0.
    pub fn call(&mut self, fn_name: &str, num_params: u32) {
        let sid = self.program.add_text(fn_name);
        self.program
            .emit(Opcode::Call, Operand::U(sid), Operand::U(num_params));
    }

    /// Drop the argument block and the receiver pushed for the call.
    pub fn pop_params(&mut self, num_params: u32) {
        self.program
            .emit(Opcode::PopN, Operand::U(num_params + 1), NONE);
    }

    // -----------------------------------------------------------------------
    // Dictionary / subscript access
    // -----------------------------------------------------------------------

    /// `obj[k]` — key in T0; leaves the element in T0.
    pub fn dict_get(&mut self, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }
        self.table.emit_read(identifier, &mut self.program, 1);
        self.program.emit(Opcode::Push, T1, NONE);
        self.program.emit(Opcode::Push, T0, NONE);
        self.call("get", 1);
        self.program.emit(Opcode::PopN, Operand::U(2), NONE);
        Ok(())
    }

    /// `obj[k] op= v`, phase 1 — after the key is in T0, park it.
    pub fn dict_set_begin(&mut self, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_parent() {
            return Err(Error::AttributionOutsideFunction {
                name: identifier.to_string(),
                line,
            });
        }
        self.program.emit(Opcode::Push, T0, NONE);
        Ok(())
    }

    /// Phase 2 — after the right-hand side is in T0. Keeps key, receiver
    /// and right-hand side in distinct registers across the `get`/`set`
    /// calls; the whole expression yields the right-hand side.
    pub fn dict_set_end(&mut self, op: char, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }

        self.program.emit(Opcode::Pop, T3, NONE);
        self.program.emit(Opcode::Mov, T2, T0);

        if op != '=' {
            // Fetch the current element into T0.
            self.table.emit_read(identifier, &mut self.program, 1);
            self.program.emit(Opcode::Push, T1, NONE);
            self.program.emit(Opcode::Push, T3, NONE);
            self.call("get", 1);
            self.program.emit(Opcode::PopN, Operand::U(2), NONE);

            // Combine it with the saved right-hand side.
            match op {
                '+' => {
                    let cat = self.new_label();
                    let end = self.new_label();
                    self.program.emit(Opcode::TypeCheckStr, T0, NONE);
                    self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                    self.program.emit(Opcode::TypeCheckStr, T2, NONE);
                    self.program.emit(Opcode::Je, Operand::U(cat), NONE);
                    self.program.emit(Opcode::Add, T0, T2);
                    self.program.emit(Opcode::Jmp, Operand::U(end), NONE);
                    self.place_label(cat);
                    self.program.emit(Opcode::Concat, T0, T2);
                    self.place_label(end);
                }
                '-' => {
                    self.program.emit(Opcode::Sub, T0, T2);
                }
                '*' => {
                    self.program.emit(Opcode::Mul, T0, T2);
                }
                _ => {
                    self.program.emit(Opcode::Div, T0, T2);
                }
            }
        }

        // Store: receiver, key, value — then yield the right-hand side.
        self.table.emit_read(identifier, &mut self.program, 1);
        self.program.emit(Opcode::Push, T1, NONE);
        self.program.emit(Opcode::Push, T3, NONE);
        self.program.emit(Opcode::Push, T0, NONE);
        self.call("set", 2);
        self.program.emit(Opcode::PopN, Operand::U(3), NONE);
        self.program.emit(Opcode::Mov, T0, T2);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    /// `if` — condition in T0; jump to `nope` when it fails.
    pub fn if_test(&mut self, nope: Label) {
        self.program.emit(Opcode::Test, T0, T0);
        self.program.emit(Opcode::Je, Operand::U(nope), NONE);
    }

    /// Between the then- and else-branches.
    pub fn else_branch(&mut self, nope: Label, done: Label) {
        self.program.emit(Opcode::Jmp, Operand::U(done), NONE);
        self.place_label(nope);
    }

    /// After the last branch (pass `nope` when there is no else).
    pub fn end_if(&mut self, done: Label) {
        self.place_label(done);
    }

    /// `return` — the value is already in T0.
    pub fn ret(&mut self) {
        self.program.emit(Opcode::Ret, NONE, NONE);
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    /// Open a function body: nest a scope and reserve the prologue slot
    /// that `end_function` patches with the local count.
    pub fn begin_function(&mut self) {
        let outer = mem::replace(&mut self.program, Program::new(0));
        self.stashed = Some(outer);
        self.table = SymTable::nest(mem::take(&mut self.table));
        self.fun_header = self.program.emit(Opcode::Nop, NONE, NONE);
    }

    /// Declare the `index`-th of `argc` formal parameters.
    pub fn declare_argument(
        &mut self,
        identifier: &str,
        line: u32,
        index: usize,
        argc: usize,
    ) -> Result<()> {
        self.program.set_arity(argc);
        if self.table.has_local_symbol(identifier) {
            return Err(Error::DuplicateParameter {
                name: identifier.to_string(),
                line,
            });
        }
        self.table
            .put_stack_symbol(identifier, index as i32 - argc as i32);
        Ok(())
    }

    /// Close the function body: patch the prologue, append the implicit
    /// null return, seal the program and hand it back.
    pub fn end_function(&mut self) -> Result<Program> {
        let num_locals = self.table.count() - self.program.arity();
        self.program
            .patch(self.fun_header, Opcode::PushN, Operand::U(num_locals as u32), NONE);
        self.program.emit(Opcode::MovNull, T0, NONE);
        self.program.emit(Opcode::Ret, NONE, NONE);

        let outer = self.stashed.take().expect("end_function without begin_function");
        let mut finished = mem::replace(&mut self.program, outer);
        finished.finalize()?;
        self.table = mem::take(&mut self.table).unnest().unwrap_or_default();
        Ok(finished)
    }

    // -----------------------------------------------------------------------
    // Constants & variables
    // -----------------------------------------------------------------------

    /// Read `identifier` into T0.
    pub fn read_identifier(&mut self, identifier: &str, line: u32) -> Result<()> {
        if !self.table.has_symbol(identifier) {
            return Err(Error::UndefinedSymbol {
                name: identifier.to_string(),
                line,
            });
        }
        self.table.emit_read(identifier, &mut self.program, 0);
        Ok(())
    }

    pub fn load_null(&mut self) {
        self.program.emit(Opcode::MovNull, T0, NONE);
    }

    pub fn load_bool(&mut self, value: bool) {
        self.program.emit(Opcode::MovBool, T0, Operand::B(value));
    }

    pub fn load_number(&mut self, value: f32) {
        self.program.emit(Opcode::MovNum, T0, Operand::F(value));
    }

    pub fn load_string(&mut self, value: &str) {
        let sid = self.program.add_text(value);
        self.program.emit(Opcode::MovStr, T0, Operand::U(sid));
    }

    pub fn load_zero(&mut self) {
        self.program.emit(Opcode::Xor, T0, T0);
    }

    /// The executing object's handle.
    pub fn load_this(&mut self) {
        self.program.emit(Opcode::MovThis, T0, NONE);
    }

    /// The root object's handle.
    pub fn load_root(&mut self) {
        self.program.emit(Opcode::MovRoot, T0, NONE);
    }

    /// The current state name.
    pub fn load_state(&mut self) {
        self.program.emit(Opcode::MovState, T0, NONE);
    }

    /// Assign T0 to the current state; ends the running iteration.
    pub fn set_state(&mut self) {
        self.program.emit(Opcode::MovState, T0, Operand::I(-1));
    }

    // -----------------------------------------------------------------------
    // Misc
    // -----------------------------------------------------------------------

    pub fn nop(&mut self) {
        self.program.emit(Opcode::Nop, NONE, NONE);
    }

    /// Push T0 (expression-statement plumbing).
    pub fn push_value(&mut self) {
        self.program.emit(Opcode::Push, T0, NONE);
    }

    /// Pop into T0.
    pub fn pop_value(&mut self) {
        self.program.emit(Opcode::Pop, T0, NONE);
    }

    /// Breakpoint annotation; no effect at runtime.
    pub fn breakpoint(&mut self, text: &str) {
        let sid = self.program.add_text(text);
        self.program
            .emit(Opcode::Nop, Operand::I(-1), Operand::U(sid));
    }
}
