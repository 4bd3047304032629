use std::collections::BTreeMap;

use serde_json::Value;

pub fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{value}"),
    }
}

/// Render a tenant page as a fixed-width table.
pub fn print_tenant_table(page: &Value) {
    let Some(tenants) = page["tenants"].as_array() else {
        print_json(page);
        return;
    };
    println!("{:<30} {:<14} {:<14} MESSAGE", "NAME", "STATUS", "SUB-STATE");
    for tenant in tenants {
        println!(
            "{:<30} {:<14} {:<14} {}",
            tenant["name"].as_str().unwrap_or("-"),
            tenant["status"].as_str().unwrap_or("-"),
            tenant["workflow_sub_state"].as_str().unwrap_or("-"),
            tenant["status_message"].as_str().unwrap_or(""),
        );
    }
    if let Some(total) = page["total"].as_u64() {
        println!("total: {total}");
    }
}

/// Count tenants per status.
pub fn print_status_summary(page: &Value) {
    let Some(tenants) = page["tenants"].as_array() else {
        print_json(page);
        return;
    };
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for tenant in tenants {
        *counts
            .entry(tenant["status"].as_str().unwrap_or("unknown"))
            .or_insert(0) += 1;
    }
    for (status, count) in counts {
        println!("{status:<14} {count}");
    }
}
