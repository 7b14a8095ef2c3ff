// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use arrow::util::pretty::pretty_format_batches;
use arrow_array::RecordBatch;
use taiga::Client;

/// Load a matrix or table datafile and print its first `limit` rows
pub fn show_command<F>(client: &Client, id: &str, limit: usize, mut handler: F) -> Result<()>
where
    F: FnMut(&str),
{
    let batches = client.get(id)?;
    let total: usize = batches.iter().map(RecordBatch::num_rows).sum();
    let head = take_rows(&batches, limit);

    handler(&pretty_format_batches(&head)?.to_string());
    if total > limit {
        handler(&format!("({limit} of {total} rows shown)"));
    }
    Ok(())
}

fn take_rows(batches: &[RecordBatch], limit: usize) -> Vec<RecordBatch> {
    let mut remaining = limit;
    let mut head = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let rows = batch.num_rows().min(remaining);
        head.push(batch.slice(0, rows));
        remaining -= rows;
    }
    head
}
