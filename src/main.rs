use crio::common::ROW_SIZE;
use crio::table::{CompareOp, IndexCondition, Table};

fn main() {
    println!("Crio - a single-table storage core in Rust");
    println!("============================================\n");

    let db_path = "demo.db";

    let table = Table::open(db_path).expect("failed to open table");
    println!("Opened table at: {}", db_path);

    for (id, name) in [(1u32, "alice"), (2, "bob"), (3, "carol")] {
        let row = encode_row(id, name);
        table.insert_row(row).expect("failed to insert row");
        println!("Inserted row id={}", id);
    }

    println!("\nSequential scan:");
    for row in table.seq_scan(None).expect("seq scan failed") {
        print_row(&row);
    }

    println!("\nIndex scan (id >= 2):");
    let cond = IndexCondition::new("id", 2, CompareOp::GreaterThanOrEqual);
    for row in table.index_scan(&cond, None).expect("index scan failed") {
        print_row(&row);
    }

    table.close().expect("failed to close table");
    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}

fn encode_row(id: u32, username: &str) -> [u8; ROW_SIZE] {
    let mut row = [0u8; ROW_SIZE];
    row[0..4].copy_from_slice(&id.to_le_bytes());
    let bytes = username.as_bytes();
    row[4..4 + bytes.len().min(32)].copy_from_slice(&bytes[..bytes.len().min(32)]);
    row
}

fn print_row(row: &[u8; ROW_SIZE]) {
    let id = u32::from_le_bytes(row[0..4].try_into().unwrap());
    let username_end = row[4..36].iter().position(|&b| b == 0).unwrap_or(32);
    let username = String::from_utf8_lossy(&row[4..4 + username_end]);
    println!("  - id={} username={}", id, username);
}
