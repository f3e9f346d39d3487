//! `tenantry compile` command implementation.

use anyhow::{Context, Result};
use tenantry_core::{TenantryConfig, RULE_ENTITY};
use tenantry_policy::{compile_entity_rules, Classifier, CompiledRule};

pub fn run(config: &TenantryConfig, entity: &str, json: bool) -> Result<()> {
    if entity == RULE_ENTITY {
        anyhow::bail!("{} never receives generated rules", RULE_ENTITY);
    }

    let class = Classifier::builtin().classify(entity);
    let rules = compile_entity_rules(entity, class, &config.tenancy)
        .with_context(|| format!("Failed to compile rules for {}", entity))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    println!("{} ({})", entity, class);
    for rule in &rules {
        print_rule(rule);
    }
    Ok(())
}

fn print_rule(rule: &CompiledRule) {
    let p = rule.permissions;
    let flag = |on: bool, c: char| if on { c } else { '-' };
    println!(
        "  {:<17} {}{}{}{}  field={}",
        rule.mode.rule_label(),
        flag(p.read, 'r'),
        flag(p.write, 'w'),
        flag(p.create, 'c'),
        flag(p.unlink, 'd'),
        rule.tenant_field
    );
    println!("    {}", rule.domain());
}
