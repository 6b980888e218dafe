//! Result batch wire encoding.

use fragstore_common::AggProgramError;

use crate::constants::{AGG_RESULT_ATTR_ID, AGG_RES_ITEM_BYTES, DEF_AGG_RESULT_BATCH_BYTES, MAX_AGG_RESULT_BATCH_BYTES, PROGRAM_MAGIC};
use crate::register::{Register, RegValue};

/// One group's encoded output: its raw GROUP BY key bytes (already
/// produced by the interpreter) paired with its aggregate result slots.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub group_key: Vec<u8>,
    pub slots: Vec<Register>,
}

fn encode_agg_res_item(reg: &Register) -> [u32; 4] {
    let (type_tag, lo, hi, is_unsigned) = match reg.value {
        RegValue::Undefined => (3u32, 0u32, 0u32, 0u8),
        RegValue::Int64(v) => (0, v as u32, (v >> 32) as u32, 0),
        RegValue::Uint64(v) => (1, v as u32, (v >> 32) as u32, 1),
        RegValue::Double(v) => {
            let bits = v.to_bits();
            (2, bits as u32, (bits >> 32) as u32, 0)
        }
    };
    let flags = (is_unsigned as u32) | ((reg.is_null as u32) << 8);
    [type_tag, lo, hi, flags]
}

fn decode_agg_res_item(words: &[u32]) -> Register {
    let is_null = (words[3] >> 8) & 1 == 1;
    let raw = (words[1] as u64) | ((words[2] as u64) << 32);
    let value = match words[0] {
        0 => RegValue::Int64(raw as i64),
        1 => RegValue::Uint64(raw),
        2 => RegValue::Double(f64::from_bits(raw)),
        _ => RegValue::Undefined,
    };
    Register { value, is_null }
}

fn pad_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut out = Vec::with_capacity((bytes.len() + 3) / 4);
    for chunk in bytes.chunks(4) {
        let mut buf = [0u8; 4];
        buf[..chunk.len()].copy_from_slice(chunk);
        out.push(u32::from_be_bytes(buf));
    }
    out
}

/// Encodes a sequence of result items into one or more batches, each
/// bounded by `MAX_AGG_RESULT_BATCH_BYTES` and preferring to stay under
/// `DEF_AGG_RESULT_BATCH_BYTES` when a batch boundary falls conveniently.
/// `n_gb_cols`/`n_agg_results` describe the program that produced `items`
/// and are stamped into every batch's header so a cold decoder (one that
/// never saw the program) can still make sense of the layout.
pub fn encode_batches(items: &[ResultItem], n_gb_cols: u16, n_agg_results: u16) -> Result<Vec<Vec<u32>>, AggProgramError> {
    let mut batches = Vec::new();
    let mut current: Vec<ResultItem> = Vec::new();
    let mut current_words = 3usize;

    for item in items {
        let gb_words = pad_to_words(&item.group_key).len();
        let agg_words = item.slots.len() * (AGG_RES_ITEM_BYTES / 4);
        let item_words = 1 + gb_words + agg_words;

        if !current.is_empty() && (current_words + item_words) * 4 > DEF_AGG_RESULT_BATCH_BYTES {
            batches.push(encode_one_batch(&current, n_gb_cols, n_agg_results)?);
            current.clear();
            current_words = 3;
        }
        current_words += item_words;
        current.push(item.clone());
    }
    if !current.is_empty() {
        batches.push(encode_one_batch(&current, n_gb_cols, n_agg_results)?);
    }
    Ok(batches)
}

fn encode_one_batch(items: &[ResultItem], n_gb_cols: u16, n_agg_results: u16) -> Result<Vec<u32>, AggProgramError> {
    let mut body = Vec::new();
    // The no-group case always carries exactly one accumulator item, but
    // it isn't a "result row" in the GROUP BY sense, so the wire count
    // reads 0 and a decoder with n_gb_cols == 0 knows to expect the one
    // item anyway.
    let n_result_items = if n_gb_cols == 0 { 0 } else { items.len() as u32 };
    body.push(n_result_items);
    for item in items {
        let gb_words = pad_to_words(&item.group_key);
        let agg_words: Vec<u32> = item.slots.iter().flat_map(|r| encode_agg_res_item(r)).collect();
        let item_header = ((item.group_key.len() as u32) << 16) | (item.slots.len() as u32 * AGG_RES_ITEM_BYTES as u32);
        body.push(item_header);
        body.extend(gb_words);
        body.extend(agg_words);
    }
    let total_words = body.len() + 2;
    if total_words * 4 > MAX_AGG_RESULT_BATCH_BYTES {
        return Err(AggProgramError::TooBigResultBatch);
    }
    let mut out = Vec::with_capacity(total_words);
    out.push(((AGG_RESULT_ATTR_ID as u32) << 16) | PROGRAM_MAGIC);
    out.push(((n_gb_cols as u32) << 16) | n_agg_results as u32);
    out.extend(body);
    Ok(out)
}

/// Decodes one batch produced by [`encode_batches`] back into result
/// items. Used by the aggregation client to merge partial results from
/// multiple fragments.
pub fn decode_batch(words: &[u32]) -> Result<Vec<ResultItem>, AggProgramError> {
    if words.len() * 4 > MAX_AGG_RESULT_BATCH_BYTES {
        return Err(AggProgramError::TooBigResultBatch);
    }
    let header0 = *words.first().ok_or(AggProgramError::EmptyProgram)?;
    if header0 & 0xFFFF != PROGRAM_MAGIC {
        return Err(AggProgramError::TooBigResultBatch);
    }
    let header1 = *words.get(1).ok_or(AggProgramError::EmptyProgram)?;
    let n_gb_cols = (header1 >> 16) as usize;

    let n_result_items = *words.get(2).ok_or(AggProgramError::EmptyProgram)? as usize;
    let n_items = if n_gb_cols == 0 && n_result_items == 0 { 1 } else { n_result_items };

    let mut pos = 3;
    let mut items = Vec::with_capacity(n_items);
    for _ in 0..n_items {
        let item_header = *words.get(pos).ok_or(AggProgramError::TooBigResultBatch)?;
        pos += 1;
        let gb_bytes = (item_header >> 16) as usize;
        let agg_bytes = (item_header & 0xFFFF) as usize;
        let gb_words_len = (gb_bytes + 3) / 4;

        let gb_words = words.get(pos..pos + gb_words_len).ok_or(AggProgramError::TooBigResultBatch)?;
        let mut group_key = Vec::with_capacity(gb_bytes);
        for w in gb_words {
            group_key.extend_from_slice(&w.to_be_bytes());
        }
        group_key.truncate(gb_bytes);
        pos += gb_words_len;

        let agg_words_len = agg_bytes / 4;
        let agg_words = words.get(pos..pos + agg_words_len).ok_or(AggProgramError::TooBigResultBatch)?;
        let slots = agg_words.chunks(AGG_RES_ITEM_BYTES / 4).map(decode_agg_res_item).collect();
        pos += agg_words_len;

        items.push(ResultItem { group_key, slots });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_result_items() {
        let items = vec![
            ResultItem {
                group_key: vec![1, 0, 0, 0, 0, 0, 0, 0, 1],
                slots: vec![Register::int64(15)],
            },
            ResultItem {
                group_key: vec![1, 0, 0, 0, 0, 0, 0, 0, 2],
                slots: vec![Register::int64(-3)],
            },
        ];

        let batches = encode_batches(&items, 1, 1).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0] & 0xFFFF, PROGRAM_MAGIC);
        assert_eq!(batches[0][1], (1u32 << 16) | 1);
        assert_eq!(batches[0][2], 2, "two grouped rows are counted on the wire");
        let decoded = decode_batch(&batches[0]).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].slots[0].value, RegValue::Int64(15));
        assert_eq!(decoded[1].slots[0].value, RegValue::Int64(-3));
    }

    #[test]
    fn null_slot_round_trips_with_is_null_flag() {
        let items = vec![ResultItem {
            group_key: Vec::new(),
            slots: vec![Register::null_of(RegValue::Undefined)],
        }];
        let batches = encode_batches(&items, 0, 1).unwrap();
        let decoded = decode_batch(&batches[0]).unwrap();
        assert!(decoded[0].slots[0].is_null);
    }

    #[test]
    fn no_group_batch_forces_result_item_count_to_zero_on_the_wire() {
        let items = vec![ResultItem {
            group_key: Vec::new(),
            slots: vec![Register::int64(42)],
        }];
        let batches = encode_batches(&items, 0, 1).unwrap();
        assert_eq!(batches[0][2], 0, "no-group batches stamp n_result_items = 0 even though one item is present");
        let decoded = decode_batch(&batches[0]).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].slots[0].value, RegValue::Int64(42));
    }
}
