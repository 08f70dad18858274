// This file is part of Ember.
//
// Ember is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Ember is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Ember.  If not, see <http://www.gnu.org/licenses/>.

//! The optimisation pipeline. Passes are deliberately conservative:
//! everything here must preserve the interpreter's observable behaviour
//! exactly, so promotion is block-local and value numbering never crosses
//! a block boundary.

use crate::ir::{BinOp, Function, Linkage, Module, Op, Term, ValueId};
use fxhash::FxHashMap;
use std::collections::HashMap;

/// Run the standard pass order over the module.
pub fn optimise(module: &mut Module) {
    for _ in 0..2 {
        for function in &mut module.functions {
            promote_memory(function);
            combine_instructions(function);
            value_number(function);
            simplify_cfg(function);
            eliminate_dead_code(function);
        }
        global_dce(module);
    }
}

/// Resolve a replacement map transitively.
fn resolve(map: &FxHashMap<ValueId, ValueId>, mut v: ValueId) -> ValueId {
    while let Some(&next) = map.get(&v) {
        if next == v {
            break;
        }
        v = next;
    }
    v
}

fn rewrite_operands(function: &mut Function, map: &FxHashMap<ValueId, ValueId>) {
    if map.is_empty() {
        return;
    }
    for instr in &mut function.instrs {
        match &mut instr.op {
            Op::Load(p) => *p = resolve(map, *p),
            Op::Store(p, v) => {
                *p = resolve(map, *p);
                *v = resolve(map, *v);
            }
            Op::GlobalField(p, _) => *p = resolve(map, *p),
            Op::Binary(_, a, b) | Op::Cmp(_, a, b) => {
                *a = resolve(map, *a);
                *b = resolve(map, *b);
            }
            Op::Select(c, a, b) | Op::Insert(c, a, b) => {
                *c = resolve(map, *c);
                *a = resolve(map, *a);
                *b = resolve(map, *b);
            }
            Op::Splat(v, _) | Op::SiToFp(v) | Op::FpToSi(v) | Op::ZExt(v) => {
                *v = resolve(map, *v)
            }
            Op::Extract(v, i) => {
                *v = resolve(map, *v);
                *i = resolve(map, *i);
            }
            Op::Call(_, args) | Op::CallNative(_, args) => {
                for a in args {
                    *a = resolve(map, *a);
                }
            }
            Op::CallIndirect(f, args) => {
                *f = resolve(map, *f);
                for a in args {
                    *a = resolve(map, *a);
                }
            }
            Op::Phi(incoming) => {
                for (_, v) in incoming {
                    *v = resolve(map, *v);
                }
            }
            Op::Param(_) | Op::ConstInt(_) | Op::ConstWorld(_) | Op::ConstFn(_)
            | Op::Alloca(_) => {}
        }
    }
    for block in &mut function.blocks {
        match &mut block.term {
            Some(Term::Ret(Some(v))) => *v = resolve(map, *v),
            Some(Term::CondBr(c, _, _)) => *c = resolve(map, *c),
            _ => {}
        }
    }
}

/// Promote memory to registers, block-locally: forward stored values to
/// later loads in the same block for allocas whose address never escapes,
/// and drop the stores of allocas that are never loaded at all.
fn promote_memory(function: &mut Function) {
    // An alloca escapes if it appears as anything other than the pointer
    // of a load or store.
    let mut escaped: Vec<bool> = vec![false; function.instrs.len()];
    for instr in &function.instrs {
        match &instr.op {
            Op::Load(_) => {}
            Op::Store(_, v) => escaped[*v] = true,
            other => {
                for operand in other.operands() {
                    escaped[operand] = true;
                }
            }
        }
    }

    let is_alloca: Vec<bool> = function
        .instrs
        .iter()
        .map(|i| matches!(i.op, Op::Alloca(_)))
        .collect();

    let mut replace: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for block in &function.blocks {
        let mut last_store: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        for &v in &block.instrs {
            match &function.instrs[v].op {
                Op::Store(p, value) if is_alloca[*p] && !escaped[*p] => {
                    last_store.insert(*p, *value);
                }
                Op::Load(p) if is_alloca[*p] && !escaped[*p] => {
                    if let Some(&value) = last_store.get(p) {
                        replace.insert(v, value);
                    }
                }
                _ => {}
            }
        }
    }
    rewrite_operands(function, &replace);

    // Recompute loads after forwarding, counting only loads still listed
    // in a block; stores to never-loaded private allocas are dead.
    let mut loaded_after: Vec<bool> = vec![false; function.instrs.len()];
    for block in &function.blocks {
        for &v in &block.instrs {
            if let Op::Load(p) = &function.instrs[v].op {
                loaded_after[*p] = true;
            }
        }
    }
    for block in &mut function.blocks {
        block.instrs.retain(|&v| match &function.instrs[v].op {
            Op::Store(p, _) => !(is_alloca[*p] && !escaped[*p] && !loaded_after[*p]),
            _ => true,
        });
    }
}

fn const_int_of(function: &Function, v: ValueId) -> Option<i32> {
    match &function.instrs[v].op {
        Op::ConstInt(k) => Some(*k),
        _ => None,
    }
}

/// Fold constants and apply algebraic identities.
fn combine_instructions(function: &mut Function) {
    let mut replace: FxHashMap<ValueId, ValueId> = FxHashMap::default();

    for v in 0..function.instrs.len() {
        let op = function.instrs[v].op.clone();
        if let Op::Binary(bin, a, b) = op {
            let ka = const_int_of(function, a);
            let kb = const_int_of(function, b);

            // Full integer constant folding, matching the interpreter's
            // wrapping semantics.
            if let (Some(x), Some(y)) = (ka, kb) {
                let folded = match bin {
                    BinOp::Add => Some(x.wrapping_add(y)),
                    BinOp::Sub => Some(x.wrapping_sub(y)),
                    BinOp::Mul => Some(x.wrapping_mul(y)),
                    BinOp::SDiv if y != 0 => Some(x.wrapping_div(y)),
                    BinOp::SRem if y != 0 => Some(x.wrapping_rem(y)),
                    BinOp::And => Some(x & y),
                    BinOp::Or => Some(x | y),
                    BinOp::Xor => Some(x ^ y),
                    BinOp::Shl => Some(x.wrapping_shl(y as u32)),
                    BinOp::AShr => Some(x.wrapping_shr(y as u32)),
                    _ => None,
                };
                if let Some(k) = folded {
                    function.instrs[v].op = Op::ConstInt(k);
                    continue;
                }
            }

            // Identities; only exact integer ones, floats keep their NaN
            // and signed-zero behaviour.
            let identity = match (bin, ka, kb) {
                (BinOp::Add, Some(0), _) => Some(b),
                (BinOp::Add, _, Some(0)) => Some(a),
                (BinOp::Sub, _, Some(0)) => Some(a),
                (BinOp::Mul, Some(1), _) => Some(b),
                (BinOp::Mul, _, Some(1)) => Some(a),
                (BinOp::Or, Some(0), _) => Some(b),
                (BinOp::Or, _, Some(0)) => Some(a),
                (BinOp::Xor, Some(0), _) => Some(b),
                (BinOp::Xor, _, Some(0)) => Some(a),
                (BinOp::And, Some(-1), _) => Some(b),
                (BinOp::And, _, Some(-1)) => Some(a),
                (BinOp::Shl, _, Some(0)) => Some(a),
                (BinOp::AShr, _, Some(0)) => Some(a),
                _ => None,
            };
            if let Some(kept) = identity {
                if function.instrs[kept].ty == function.instrs[v].ty {
                    replace.insert(v, kept);
                }
            }
        } else if let Op::Select(_, a, b) = op {
            if a == b {
                replace.insert(v, a);
            }
        }
    }
    rewrite_operands(function, &replace);
}

/// Local common-subexpression elimination: identical pure instructions
/// within one block collapse to the first occurrence.
fn value_number(function: &mut Function) {
    let mut replace: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for block in &function.blocks {
        let mut seen: HashMap<String, ValueId> = HashMap::new();
        for &v in &block.instrs {
            let instr = &function.instrs[v];
            let pure = !instr.op.has_side_effects()
                && !matches!(
                    instr.op,
                    Op::Load(_) | Op::Alloca(_) | Op::Phi(_) | Op::Param(_)
                );
            if !pure {
                continue;
            }
            let key = format!("{:?}|{:?}", instr.op, instr.ty);
            match seen.get(&key) {
                Some(&first) => {
                    replace.insert(v, first);
                }
                None => {
                    seen.insert(key, v);
                }
            }
        }
    }
    rewrite_operands(function, &replace);
}

/// Thread single-incoming phis, merge straight-line block pairs and drop
/// unreachable blocks.
fn simplify_cfg(function: &mut Function) {
    // Phis with a single predecessor are aliases.
    loop {
        let preds = function.predecessors();
        let mut replace: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        for (id, block) in function.blocks.iter().enumerate() {
            if preds[id].len() != 1 {
                continue;
            }
            for &v in &block.instrs {
                if let Op::Phi(incoming) = &function.instrs[v].op {
                    if incoming.len() == 1 {
                        replace.insert(v, incoming[0].1);
                    }
                }
            }
        }
        if replace.is_empty() {
            break;
        }
        rewrite_operands(function, &replace);
        for block in &mut function.blocks {
            block.instrs.retain(|v| !replace.contains_key(v));
        }
    }

    // Merge `A -> br B` where A is B's only predecessor.
    loop {
        let preds = function.predecessors();
        let mut merged = false;
        for a in 0..function.blocks.len() {
            let target = match &function.blocks[a].term {
                Some(Term::Br(b)) => *b,
                _ => continue,
            };
            if target == 0 || target == a || preds[target] != vec![a] {
                continue;
            }
            // Phis in the target have a single incoming by construction.
            let target_instrs: Vec<ValueId> = function.blocks[target].instrs.clone();
            let mut alias: FxHashMap<ValueId, ValueId> = FxHashMap::default();
            let mut moved = Vec::new();
            for v in target_instrs {
                if let Op::Phi(incoming) = &function.instrs[v].op {
                    alias.insert(v, incoming[0].1);
                } else {
                    moved.push(v);
                }
            }
            rewrite_operands(function, &alias);
            let term = function.blocks[target].term.take();
            function.blocks[target].instrs.clear();
            function.blocks[a].instrs.extend(moved);
            function.blocks[a].term = term;

            // Successor phis that referenced the target now come from A.
            let successors = function.blocks[a]
                .term
                .as_ref()
                .map(|t| t.successors())
                .unwrap_or_default();
            for succ in successors {
                let succ_instrs = function.blocks[succ].instrs.clone();
                for v in succ_instrs {
                    if let Op::Phi(incoming) = &mut function.instrs[v].op {
                        for (from, _) in incoming {
                            if *from == target {
                                *from = a;
                            }
                        }
                    }
                }
            }
            merged = true;
            break;
        }
        if !merged {
            break;
        }
    }

    // Remove unreachable blocks, renumbering the rest.
    let mut reachable = vec![false; function.blocks.len()];
    let mut worklist = vec![0usize];
    while let Some(b) = worklist.pop() {
        if reachable[b] {
            continue;
        }
        reachable[b] = true;
        if let Some(term) = &function.blocks[b].term {
            worklist.extend(term.successors());
        }
    }
    if reachable.iter().all(|&r| r) {
        return;
    }

    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut kept = Vec::new();
    for (id, block) in function.blocks.drain(..).enumerate() {
        if reachable[id] {
            remap.insert(id, kept.len());
            kept.push(block);
        }
    }
    function.blocks = kept;
    for block in &mut function.blocks {
        match &mut block.term {
            Some(Term::Br(b)) => *b = remap[b],
            Some(Term::CondBr(_, t, e)) => {
                *t = remap[t];
                *e = remap[e];
            }
            _ => {}
        }
    }
    for instr in &mut function.instrs {
        if let Op::Phi(incoming) = &mut instr.op {
            incoming.retain(|(from, _)| remap.contains_key(from));
            for (from, _) in incoming {
                *from = remap[from];
            }
        }
    }
}

/// Aggressive dead-code elimination: keep side effects, terminator
/// operands and everything they transitively use.
fn eliminate_dead_code(function: &mut Function) {
    let mut live = vec![false; function.instrs.len()];
    let mut worklist: Vec<ValueId> = Vec::new();

    for block in &function.blocks {
        for &v in &block.instrs {
            if function.instrs[v].op.has_side_effects() {
                worklist.push(v);
            }
        }
        match &block.term {
            Some(Term::Ret(Some(v))) => worklist.push(*v),
            Some(Term::CondBr(c, _, _)) => worklist.push(*c),
            _ => {}
        }
    }

    while let Some(v) = worklist.pop() {
        if live[v] {
            continue;
        }
        live[v] = true;
        worklist.extend(function.instrs[v].op.operands());
    }

    for block in &mut function.blocks {
        block.instrs.retain(|&v| live[v]);
    }
}

/// Drop internal functions that nothing references.
fn global_dce(module: &mut Module) {
    let mut live = vec![false; module.functions.len()];
    let mut worklist: Vec<usize> = module
        .functions
        .iter()
        .enumerate()
        .filter(|(_, f)| f.linkage == Linkage::External)
        .map(|(id, _)| id)
        .collect();

    while let Some(id) = worklist.pop() {
        if live[id] {
            continue;
        }
        live[id] = true;
        for instr in &module.functions[id].instrs {
            match &instr.op {
                Op::Call(callee, _) => worklist.push(*callee),
                Op::ConstFn(callee) => worklist.push(*callee),
                _ => {}
            }
        }
    }

    if live.iter().all(|&l| l) {
        return;
    }

    let mut remap: HashMap<usize, usize> = HashMap::new();
    let mut kept = Vec::new();
    for (id, function) in module.functions.drain(..).enumerate() {
        if live[id] {
            remap.insert(id, kept.len());
            kept.push(function);
        }
    }
    module.functions = kept;
    for function in &mut module.functions {
        for instr in &mut function.instrs {
            match &mut instr.op {
                Op::Call(callee, _) => *callee = remap[callee],
                Op::ConstFn(callee) => *callee = remap[callee],
                _ => {}
            }
        }
    }
}
