//! The runtime environment and the interpreter.
//!
//! [`Runtime`] bundles the three collaborators every running program
//! needs — the program pool, the shared stack, and the object manager —
//! and exposes the host-facing surface: spawning and deleting objects,
//! driving lifecycle phases, calling scripted functions, and running the
//! garbage collector between updates.
//!
//! [`run`] is the dispatch loop: a fetch-decode-execute `loop` over a
//! finalized [`Program`], with four scratch registers, a comparison flag
//! consumed by the conditional jumps, and an instruction pointer that
//! jumps overwrite. Execution is single-threaded and cooperative; every
//! instruction is atomic, and the only yield point is returning to the
//! host.

use std::any::Any;
use std::cmp::Ordering;

use crate::bytecode::{Opcode, Operand, Program};
use crate::error::{Error, Result};
use crate::log;
use crate::manager::{ObjectManager, ROOT_HANDLE};
use crate::pool::ProgramPool;
use crate::stack::Stack;
use crate::value::Value;

/// Name of the emitted object initializer program (primes the heap and
/// runs field initializers).
pub const INIT_PROGRAM: &str = "__init";

/// Name of the optional user constructor, run right after the initializer.
pub const CONSTRUCTOR_PROGRAM: &str = "constructor";

/// Name of the optional user destructor, run when an object is released.
pub const DESTRUCTOR_PROGRAM: &str = "destructor";

/// Name of the optional render program.
pub const RENDER_PROGRAM: &str = "render";

/// Prefix of state programs: the update phase runs `"state:" + state`.
pub const STATE_PREFIX: &str = "state:";

/// Everything a program executes against.
pub struct Runtime {
    pool: ProgramPool,
    stack: Stack,
    manager: ObjectManager,
}

impl Runtime {
    /// Create a runtime with a fresh root object of type `root_name`.
    pub fn new(root_name: &str) -> Self {
        let mut manager = ObjectManager::new();
        manager
            .spawn_object(0, root_name, None)
            .expect("spawning the root cannot fail on an empty manager");
        Self {
            pool: ProgramPool::new(),
            stack: Stack::new(),
            manager,
        }
    }

    pub fn pool(&self) -> &ProgramPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut ProgramPool {
        &mut self.pool
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn manager(&self) -> &ObjectManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut ObjectManager {
        &mut self.manager
    }

    /// Spawn an object of type `name` under `parent` and run its init
    /// phase (the emitted initializer, then the user constructor).
    pub fn spawn(&mut self, parent: u32, name: &str) -> Result<u32> {
        self.spawn_with_data(parent, name, None)
    }

    pub fn spawn_with_data(
        &mut self,
        parent: u32,
        name: &str,
        user_data: Option<Box<dyn Any>>,
    ) -> Result<u32> {
        let handle = self.manager.spawn_object(parent, name, user_data)?;
        self.init_object(handle)?;
        Ok(handle)
    }

    /// Release and destroy the object at `handle`. Returns `false` when
    /// the handle does not identify a live object.
    pub fn delete_object(&mut self, handle: u32) -> Result<bool> {
        if !self.manager.exists(handle) {
            return Ok(false);
        }
        self.release_object(handle)?;
        Ok(self.manager.delete(handle))
    }

    /// Init phase: run the emitted initializer and the user constructor.
    pub fn init_object(&mut self, handle: u32) -> Result<()> {
        self.run_if_present(handle, INIT_PROGRAM)?;
        self.run_if_present(handle, CONSTRUCTOR_PROGRAM)?;
        Ok(())
    }

    /// Update phase: run the program of the object's current state.
    /// Killed objects are skipped; the return value says whether the
    /// object took part in the update.
    pub fn update_object(&mut self, handle: u32) -> Result<bool> {
        let object = self.manager.get(handle)?;
        if object.is_killed() {
            return Ok(false);
        }
        let program_name = format!("{STATE_PREFIX}{}", object.state());
        self.run_if_present(handle, &program_name)?;
        Ok(true)
    }

    /// Render phase.
    pub fn render_object(&mut self, handle: u32) -> Result<()> {
        self.run_if_present(handle, RENDER_PROGRAM)?;
        Ok(())
    }

    /// Release phase: run the user destructor.
    pub fn release_object(&mut self, handle: u32) -> Result<()> {
        self.run_if_present(handle, DESTRUCTOR_PROGRAM)?;
        Ok(())
    }

    /// Call the function `fn_name` on the object at `handle` with `args`,
    /// following the same stack protocol compiled calls use.
    pub fn call(&mut self, handle: u32, fn_name: &str, args: &[Value]) -> Result<Value> {
        let object_name = self.manager.get(handle)?.name().to_string();
        let program = self
            .pool
            .get(&object_name, fn_name)
            .ok_or_else(|| Error::UnknownProgram {
                object: object_name,
                function: fn_name.to_string(),
            })?;
        if program.arity() != args.len() {
            return Err(Error::ArityMismatch {
                function: fn_name.to_string(),
                expected: program.arity(),
                got: args.len(),
            });
        }

        self.stack.push(Value::ObjectHandle(handle));
        for arg in args {
            self.stack.push(arg.clone());
        }
        let result = run(&program, self, handle);
        for _ in 0..args.len() + 1 {
            self.stack.pop()?;
        }
        result
    }

    /// Run one slice of garbage collection. Call between updates.
    pub fn collect_garbage(&mut self) {
        self.manager.collect_garbage(&self.stack);
    }

    fn run_if_present(&mut self, handle: u32, fn_name: &str) -> Result<Option<Value>> {
        let object_name = self.manager.get(handle)?.name().to_string();
        match self.pool.get(&object_name, fn_name) {
            Some(program) => Ok(Some(run(&program, self, handle)?)),
            None => Ok(None),
        }
    }
}

/// Outcome of a single instruction dispatch.
enum Flow {
    /// Fall through to the next instruction (or the jump target).
    Next,
    /// End the program.
    Return,
}

/// Execute a finalized program against `runtime` on behalf of the object
/// at `self_handle`. Returns the value left in `T0`.
///
/// A fresh environment is opened on the shared stack for the duration of
/// the run, so caller-pushed arguments sit at negative frame offsets and
/// `PushN` locals at non-negative ones.
pub fn run(program: &Program, runtime: &mut Runtime, self_handle: u32) -> Result<Value> {
    if !program.is_finalized() {
        log::fatal("attempt to run a program that was never finalized");
    }

    runtime.stack.push_env(0);
    let result = run_instructions(program, runtime, self_handle);
    let popped = runtime.stack.pop_env();
    let value = result?;
    popped?;
    Ok(value)
}

fn run_instructions(program: &Program, runtime: &mut Runtime, self_handle: u32) -> Result<Value> {
    let mut t = [Value::Null, Value::Null, Value::Null, Value::Null];
    let mut flag = Ordering::Equal;
    let mut ip = 0usize;

    while ip < program.len() {
        let instruction = *program.instruction(ip);
        ip += 1;

        let a = instruction.a;
        let b = instruction.b;

        let flow = match instruction.op {
            // --- Data moves ---
            Opcode::Mov => {
                t[reg(a)] = t[reg(b)].clone();
                Flow::Next
            }
            Opcode::MovNull => {
                t[reg(a)] = Value::Null;
                Flow::Next
            }
            Opcode::MovBool => {
                t[reg(a)] = Value::Boolean(b.as_b());
                Flow::Next
            }
            Opcode::MovNum => {
                let n = b.as_f();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::MovStr => {
                t[reg(a)] = Value::String(program.text(b.as_u()).to_string());
                Flow::Next
            }
            Opcode::MovThis => {
                t[reg(a)] = Value::ObjectHandle(self_handle);
                Flow::Next
            }
            Opcode::MovRoot => {
                t[reg(a)] = Value::ObjectHandle(ROOT_HANDLE);
                Flow::Next
            }
            Opcode::MovState => {
                if matches!(b, Operand::I(i) if i < 0) {
                    let state = t[reg(a)].to_text();
                    runtime.manager.get_mut(self_handle)?.set_state(&state);
                    return Ok(t[0].clone());
                }
                let state = runtime.manager.get(self_handle)?.state().to_string();
                t[reg(a)] = Value::String(state);
                Flow::Next
            }

            // --- Symbol access ---
            Opcode::LoadHeap => {
                let value = runtime
                    .manager
                    .get(self_handle)?
                    .heap()
                    .at(b.as_u())?
                    .clone();
                t[reg(a)] = value;
                Flow::Next
            }
            Opcode::StoreHeap => {
                let value = t[reg(a)].clone();
                runtime
                    .manager
                    .get_mut(self_handle)?
                    .heap_mut()
                    .set(b.as_u(), value)?;
                Flow::Next
            }
            Opcode::LoadStack => {
                t[reg(a)] = runtime.stack.peek(b.as_i())?.clone();
                Flow::Next
            }
            Opcode::StoreStack => {
                runtime.stack.write(b.as_i(), t[reg(a)].clone())?;
                Flow::Next
            }

            // --- Arithmetic ---
            Opcode::Add => {
                let n = t[reg(a)].to_number() + t[reg(b)].to_number();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Sub => {
                let n = t[reg(a)].to_number() - t[reg(b)].to_number();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Mul => {
                let n = t[reg(a)].to_number() * t[reg(b)].to_number();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Div => {
                let n = t[reg(a)].to_number() / t[reg(b)].to_number();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Neg => {
                let n = -t[reg(b)].to_number();
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Inc => {
                let n = t[reg(a)].to_number() + 1.0;
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Dec => {
                let n = t[reg(a)].to_number() - 1.0;
                t[reg(a)] = Value::Number(n);
                flag = zero_test(n);
                Flow::Next
            }
            Opcode::Xor => {
                t[reg(a)] = Value::Number(0.0);
                flag = Ordering::Equal;
                Flow::Next
            }

            // --- Logic & strings ---
            Opcode::LogicalNot => {
                t[reg(a)] = Value::Boolean(!t[reg(b)].is_truthy());
                Flow::Next
            }
            Opcode::Concat => {
                let mut text = t[reg(a)].to_text();
                text.push_str(&t[reg(b)].to_text());
                t[reg(a)] = Value::String(text);
                Flow::Next
            }

            // --- Stack ---
            Opcode::Push => {
                runtime.stack.push(t[reg(a)].clone());
                Flow::Next
            }
            Opcode::Pop => {
                t[reg(a)] = runtime.stack.pop()?;
                Flow::Next
            }
            Opcode::PopN => {
                for _ in 0..a.as_u() {
                    runtime.stack.pop()?;
                }
                Flow::Next
            }
            Opcode::PushN => {
                for _ in 0..a.as_u() {
                    runtime.stack.push(Value::Null);
                }
                Flow::Next
            }
            Opcode::Xchg => {
                t.swap(reg(a), reg(b));
                Flow::Next
            }

            // --- Type checks ---
            Opcode::TypeCheckNum => {
                flag = type_check(t[reg(a)].is_number());
                Flow::Next
            }
            Opcode::TypeCheckStr => {
                flag = type_check(t[reg(a)].is_string());
                Flow::Next
            }
            Opcode::TypeCheckObj => {
                flag = type_check(t[reg(a)].is_object_handle());
                Flow::Next
            }
            Opcode::TypeCheckBool => {
                flag = type_check(t[reg(a)].is_boolean());
                Flow::Next
            }
            Opcode::TypeCheckNull => {
                flag = type_check(t[reg(a)].is_null());
                Flow::Next
            }

            // --- Compare / test ---
            Opcode::Cmp => {
                flag = t[reg(a)].compare(&t[reg(b)]);
                Flow::Next
            }
            Opcode::Test => {
                flag = if t[reg(a)].is_truthy() {
                    Ordering::Greater
                } else {
                    Ordering::Equal
                };
                Flow::Next
            }

            // --- Control flow ---
            Opcode::Jmp => {
                ip = jump_target(program, a);
                Flow::Next
            }
            Opcode::Je => {
                if flag == Ordering::Equal {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }
            Opcode::Jne => {
                if flag != Ordering::Equal {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }
            Opcode::Jg => {
                if flag == Ordering::Greater {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }
            Opcode::Jge => {
                if flag != Ordering::Less {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }
            Opcode::Jl => {
                if flag == Ordering::Less {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }
            Opcode::Jle => {
                if flag != Ordering::Greater {
                    ip = jump_target(program, a);
                }
                Flow::Next
            }

            // --- Calls ---
            Opcode::Call => {
                let fn_name = program.text(a.as_u()).to_string();
                let argc = b.as_u() as usize;
                t[0] = call_scripted(runtime, &fn_name, argc)?;
                Flow::Next
            }

            // --- Heap ---
            Opcode::Alloc => {
                runtime.manager.get_mut(self_handle)?.heap_mut().alloc();
                Flow::Next
            }

            // --- Lifecycle / misc ---
            Opcode::Ret => Flow::Return,
            Opcode::Nop => Flow::Next,
        };

        if let Flow::Return = flow {
            break;
        }
    }

    Ok(t[0].clone())
}

/// Dispatch a compiled call: the receiver handle sits directly below the
/// `argc` arguments on the stack.
fn call_scripted(runtime: &mut Runtime, fn_name: &str, argc: usize) -> Result<Value> {
    let receiver = runtime.stack.from_top(argc)?.clone();
    let handle = receiver.as_object_handle()?;
    let object_name = runtime.manager.get(handle)?.name().to_string();

    let program = runtime
        .pool
        .get(&object_name, fn_name)
        .ok_or_else(|| Error::UnknownProgram {
            object: object_name,
            function: fn_name.to_string(),
        })?;
    if program.arity() != argc {
        return Err(Error::ArityMismatch {
            function: fn_name.to_string(),
            expected: program.arity(),
            got: argc,
        });
    }

    run(&program, runtime, handle)
}

fn reg(operand: Operand) -> usize {
    let index = operand.as_u() as usize;
    if index > 3 {
        log::fatal(&format!("malformed register operand T{index}"));
    }
    index
}

fn jump_target(program: &Program, operand: Operand) -> usize {
    let target = operand.as_u() as usize;
    if target > program.len() {
        log::fatal(&format!("jump to instruction {target} is out of range"));
    }
    target
}

fn zero_test(n: f32) -> Ordering {
    if n == 0.0 {
        Ordering::Equal
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Less
    }
}

fn type_check(matches: bool) -> Ordering {
    if matches {
        Ordering::Equal
    } else {
        Ordering::Greater
    }
}
