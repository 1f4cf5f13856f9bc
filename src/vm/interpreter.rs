// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use std::collections::BTreeMap;

use ethereum_types::U256;
use log::trace;

use super::{Instruction, Memory, Stack, VmError};

/// Everything one contract invocation needs. The storage reference aliases
/// the contract's persistent slot map, so successful writes survive the
/// call; revert handling is the transaction executor's job.
pub struct ExecutionContext<'a> {
    pub stack: Stack,
    pub memory: Memory,
    pub storage: &'a mut BTreeMap<U256, U256>,
    pub code: &'a [u8],
    pub pc: usize,
    pub gas: u64,
    pub stopped: bool,
    pub verbose: bool,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(code: &'a [u8], storage: &'a mut BTreeMap<U256, U256>, gas: u64) -> Self {
        ExecutionContext {
            stack: Stack::new(),
            memory: Memory::new(),
            storage,
            code,
            pc: 0,
            gas,
            stopped: false,
            verbose: false,
        }
    }
}

/// The stateless bytecode interpreter.
pub struct Interpreter;

impl Interpreter {
    /// Run `ctx.code` to completion, a STOP, or an error.
    ///
    /// On error the context is left where it failed; the caller decides
    /// what to do with the partially-mutated storage.
    pub fn run(ctx: &mut ExecutionContext) -> Result<(), VmError> {
        while ctx.pc < ctx.code.len() && !ctx.stopped {
            let byte = ctx.code[ctx.pc];
            let instruction =
                Instruction::from_u8(byte).ok_or(VmError::InvalidInstruction(byte))?;

            let cost = instruction.gas_cost();
            if ctx.gas < cost {
                return Err(VmError::OutOfGas {
                    needed: cost,
                    left: ctx.gas,
                });
            }
            ctx.gas -= cost;

            if ctx.verbose {
                trace!(
                    "pc={} op={} gas={}",
                    ctx.pc,
                    instruction.name(),
                    ctx.gas
                );
            }

            Self::exec_instruction(instruction, ctx)?;

            // Step past the opcode and any inline push payload.
            ctx.pc += 1 + instruction.payload_len();
        }
        Ok(())
    }

    fn exec_instruction(
        instruction: Instruction,
        ctx: &mut ExecutionContext,
    ) -> Result<(), VmError> {
        match instruction {
            Instruction::Stop => {
                ctx.stopped = true;
            }
            Instruction::Add => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(a.overflowing_add(b).0)?;
            }
            Instruction::Sub => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(a.overflowing_sub(b).0)?;
            }
            Instruction::Mul => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(a.overflowing_mul(b).0)?;
            }
            Instruction::Div => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                // Division by zero yields zero.
                ctx.stack.push(a.checked_div(b).unwrap_or_default())?;
            }
            Instruction::Mod => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(a.checked_rem(b).unwrap_or_default())?;
            }
            Instruction::Lt => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(bool_word(a < b))?;
            }
            Instruction::Gt => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(bool_word(a > b))?;
            }
            Instruction::Eq => {
                let (a, b) = (ctx.stack.pop()?, ctx.stack.pop()?);
                ctx.stack.push(bool_word(a == b))?;
            }
            Instruction::Pop => {
                ctx.stack.pop()?;
            }
            Instruction::MLoad => {
                let offset = ctx.stack.pop()?;
                let word = ctx.memory.load(offset)?;
                ctx.stack.push(word)?;
            }
            Instruction::MStore => {
                let offset = ctx.stack.pop()?;
                let value = ctx.stack.pop()?;
                ctx.memory.store(offset, value)?;
            }
            Instruction::SLoad => {
                let key = ctx.stack.pop()?;
                let value = ctx.storage.get(&key).copied().unwrap_or_default();
                ctx.stack.push(value)?;
            }
            Instruction::SStore => {
                let key = ctx.stack.pop()?;
                let value = ctx.stack.pop()?;
                // Zero writes prune the slot.
                if value.is_zero() {
                    ctx.storage.remove(&key);
                } else {
                    ctx.storage.insert(key, value);
                }
            }
            Instruction::Push(width) => {
                let start = ctx.pc + 1;
                if start + width > ctx.code.len() {
                    return Err(VmError::TruncatedPush);
                }
                let value = U256::from_big_endian(&ctx.code[start..start + width]);
                ctx.stack.push(value)?;
            }
            Instruction::Dup(depth) => {
                let value = ctx.stack.peek(depth)?;
                ctx.stack.push(value)?;
            }
            Instruction::Swap(depth) => {
                ctx.stack.swap(depth)?;
            }
        }
        Ok(())
    }
}

fn bool_word(condition: bool) -> U256 {
    if condition {
        U256::one()
    } else {
        U256::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code: &[u8], gas: u64) -> (Result<(), VmError>, BTreeMap<U256, U256>, Option<U256>) {
        let mut storage = BTreeMap::new();
        let result;
        let top;
        {
            let mut ctx = ExecutionContext::new(code, &mut storage, gas);
            result = Interpreter::run(&mut ctx);
            top = ctx.stack.peek(1).ok();
        }
        (result, storage, top)
    }

    #[test]
    fn push_add_stop() {
        // PUSH1 2, PUSH1 3, ADD, STOP
        let (result, _, top) = run(&[0x60, 0x02, 0x60, 0x03, 0x01, 0x00], 1000);
        result.unwrap();
        assert_eq!(top, Some(U256::from(5)));
    }

    #[test]
    fn division_by_zero_pushes_zero() {
        // PUSH1 0, PUSH1 9, DIV  → 9 / 0 = 0
        let (result, _, top) = run(&[0x60, 0x00, 0x60, 0x09, 0x04, 0x00], 1000);
        result.unwrap();
        assert_eq!(top, Some(U256::zero()));

        // PUSH1 0, PUSH1 9, MOD
        let (result, _, top) = run(&[0x60, 0x00, 0x60, 0x09, 0x06, 0x00], 1000);
        result.unwrap();
        assert_eq!(top, Some(U256::zero()));
    }

    #[test]
    fn comparisons_push_bit() {
        // PUSH1 5, PUSH1 3, LT  → 3 < 5 → 1
        let (result, _, top) = run(&[0x60, 0x05, 0x60, 0x03, 0x10, 0x00], 1000);
        result.unwrap();
        assert_eq!(top, Some(U256::one()));
    }

    #[test]
    fn counter_contract_increments_storage() {
        // PUSH1 0, SLOAD, PUSH1 1, ADD, PUSH1 0, SSTORE, STOP
        let code = [0x60, 0x00, 0x54, 0x60, 0x01, 0x01, 0x60, 0x00, 0x55, 0x00];
        let mut storage = BTreeMap::new();

        for expected in 1..=2u64 {
            let mut ctx = ExecutionContext::new(&code, &mut storage, 1_000_000);
            Interpreter::run(&mut ctx).unwrap();
            assert!(ctx.stopped);
            drop(ctx);
            assert_eq!(storage.get(&U256::zero()), Some(&U256::from(expected)));
        }
    }

    #[test]
    fn sstore_zero_prunes_slot() {
        // PUSH1 7, PUSH1 0, SSTORE, PUSH1 0, PUSH1 0, SSTORE, STOP
        let code = [
            0x60, 0x07, 0x60, 0x00, 0x55, // store 7 at slot 0
            0x60, 0x00, 0x60, 0x00, 0x55, // store 0 at slot 0
            0x00,
        ];
        let (result, storage, _) = run(&code, 1_000_000);
        result.unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn out_of_gas_fails() {
        // A single SSTORE costs 20k; 100 gas cannot pay for it.
        let code = [0x60, 0x01, 0x60, 0x00, 0x55, 0x00];
        let (result, _, _) = run(&code, 100);
        assert!(matches!(result, Err(VmError::OutOfGas { .. })));
    }

    #[test]
    fn gas_is_metered_per_instruction() {
        // PUSH1 2 (3), PUSH1 3 (3), ADD (3), STOP (0) = 9 gas.
        let code = [0x60, 0x02, 0x60, 0x03, 0x01, 0x00];
        let mut storage = BTreeMap::new();
        let mut ctx = ExecutionContext::new(&code, &mut storage, 100);
        Interpreter::run(&mut ctx).unwrap();
        assert_eq!(ctx.gas, 91);
    }

    #[test]
    fn stack_underflow_fails() {
        let (result, _, _) = run(&[0x01], 1000); // ADD on empty stack
        assert_eq!(result, Err(VmError::StackUnderflow));
    }

    #[test]
    fn invalid_instruction_fails() {
        let (result, _, _) = run(&[0xfe], 1000);
        assert_eq!(result, Err(VmError::InvalidInstruction(0xfe)));
    }

    #[test]
    fn truncated_push_fails() {
        let (result, _, _) = run(&[0x60], 1000);
        assert_eq!(result, Err(VmError::TruncatedPush));
    }

    #[test]
    fn push32_reads_full_word() {
        let mut code = vec![0x7f];
        code.extend([0xff; 32]);
        code.push(0x00);
        let (result, _, top) = run(&code, 1000);
        result.unwrap();
        assert_eq!(top, Some(U256::MAX));
    }
}
