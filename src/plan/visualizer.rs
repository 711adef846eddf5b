use super::{CorePlan, ExecutionPlan, Operand, SetOp, SetStep, TestChain};
use itertools::Itertools;
use std::fmt::{self, Write};

/// Formats an execution plan for debugging, naming slots by `names`.
pub fn visualize_plan(plan: &ExecutionPlan, names: &[String], title: &str) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = write_plan(&mut output, plan, names, title);
    output
}

fn slot_name(names: &[String], slot: usize) -> String {
    names
        .get(slot)
        .cloned()
        .unwrap_or_else(|| format!("#{}", slot))
}

fn operand(names: &[String], operand: &Operand) -> String {
    match operand {
        Operand::Constant(v) => v.to_string(),
        Operand::Slot(slot) => slot_name(names, *slot),
    }
}

fn write_plan(out: &mut String, plan: &ExecutionPlan, names: &[String], title: &str) -> fmt::Result {
    writeln!(out, "======== PLAN: {} ========", title)?;
    write_core(out, &plan.core, names)?;

    let stream = &plan.stream;
    writeln!(out, "\n--- STREAM ---")?;
    writeln!(
        out,
        "columns {}, food #{}, amount #{}, scale {}",
        stream.columns, stream.food, stream.amount, stream.scale
    )?;
    for mv in &stream.moves {
        writeln!(out, "  column #{} -> {}", mv.from, slot_name(names, mv.to))?;
    }
    if let Some(cook) = stream.cook {
        writeln!(out, "  cook id from column #{}", cook)?;
    }
    for reduction in &stream.reductions {
        let targets = reduction.targets.iter().map(|t| slot_name(names, *t)).join(", ");
        match reduction.weight {
            Some(weight) => writeln!(
                out,
                "  weight reduce by column #{} of {}: {}",
                reduction.column,
                slot_name(names, weight),
                targets
            )?,
            None => writeln!(
                out,
                "  reduce by column #{}: {}",
                reduction.column,
                targets
            )?,
        }
    }
    match &stream.tests {
        TestChain::None => {}
        TestChain::Table(tests) => {
            writeln!(out, "\n--- TABLE TESTS ---")?;
            for (i, test) in tests.iter().enumerate() {
                writeln!(
                    out,
                    "{:04}: column #{} {} {:<12} -> {:04}",
                    i,
                    test.column,
                    test.op.symbol(),
                    test.value,
                    test.on_true
                )?;
            }
        }
        TestChain::Output(tests) => {
            writeln!(out, "\n--- TESTS ---")?;
            for (i, test) in tests.iter().enumerate() {
                writeln!(
                    out,
                    "{:04}: {} {} {:<12} -> {:04}",
                    i,
                    operand(names, &test.left),
                    test.op.symbol(),
                    operand(names, &test.right),
                    test.on_true
                )?;
            }
        }
    }
    if stream.is_grouped() {
        writeln!(out, "\n--- GROUPS ---")?;
        for mv in &stream.input_groups {
            writeln!(out, "  input key {}", slot_name(names, mv.to))?;
        }
        for slot in &stream.food_groups {
            writeln!(out, "  food key {}", slot_name(names, *slot))?;
        }
        for transpose in &stream.transposes {
            writeln!(
                out,
                "  transpose by column #{} into {} groups at {}",
                transpose.pivot,
                transpose.groups,
                slot_name(names, transpose.base)
            )?;
        }
    }
    writeln!(out, "\n================ END OF PLAN ================")
}

fn write_core(out: &mut String, core: &CorePlan, names: &[String]) -> fmt::Result {
    writeln!(out, "width {} ({} written)", core.width, core.real_width)?;
    writeln!(out, "\n--- FOOD ---")?;
    for mv in &core.food_moves {
        writeln!(out, "  table #{} -> {}", mv.from, slot_name(names, mv.to))?;
    }
    for mv in &core.nutrients {
        writeln!(out, "  table #{} => {}", mv.from, slot_name(names, mv.to))?;
    }
    for (i, method) in core.cook_methods.iter().enumerate() {
        for reduction in &method.reductions {
            writeln!(
                out,
                "  cook {} by table #{}: {}",
                i + 1,
                reduction.fraction,
                reduction.targets.iter().map(|t| slot_name(names, *t)).join(", ")
            )?;
        }
    }
    writeln!(out, "\n--- SETS ---")?;
    for (i, step) in core.sets.iter().enumerate() {
        if core.plain_only_from == Some(i) {
            writeln!(out, "  -- plain foods only --")?;
        }
        write_step(out, i, step, names)?;
    }
    if !core.group_sets.is_empty() {
        writeln!(out, "\n--- GROUP SETS ---")?;
        for (i, step) in core.group_sets.iter().enumerate() {
            write_step(out, i, step, names)?;
        }
    }
    Ok(())
}

fn write_step(out: &mut String, index: usize, step: &SetStep, names: &[String]) -> fmt::Result {
    let symbol = match step.op {
        SetOp::Copy => "=",
        SetOp::Add => "+=",
        SetOp::Sub => "-=",
        SetOp::Mul => "*=",
        SetOp::Div => "/=",
    };
    writeln!(
        out,
        "{:04}: {:<20} {:<3} {}",
        index,
        slot_name(names, step.target),
        symbol,
        operand(names, &step.operand)
    )
}
