use serde_json::Value;
use std::io;

/// Collections written one record per element, checked in order.
const ROW_KEYS: [&str; 3] = ["rows", "points", "exposures"];

/// Write output as CSV to stdout.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    let result = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);
    let result = result.get("run").unwrap_or(result);

    match result {
        Value::Object(map) => {
            if let Some(Value::Object(curves)) = map.get("curves") {
                write_curves_csv(&mut wtr, curves);
            } else if let Some(Value::Array(rows)) = ROW_KEYS.iter().find_map(|k| map.get(*k)) {
                write_array_csv(&mut wtr, rows);
            } else {
                let _ = wtr.write_record(["field", "value"]);
                for (key, val) in map {
                    let _ = wtr.write_record([key.as_str(), &format_csv_value(val)]);
                }
            }
        }
        Value::Array(arr) => write_array_csv(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([&format_csv_value(result)]);
        }
    }

    let _ = wtr.flush();
}

/// Long format: state, period, marginal, cumulative, survival.
fn write_curves_csv(
    wtr: &mut csv::Writer<io::StdoutLock<'_>>,
    curves: &serde_json::Map<String, Value>,
) {
    let _ = wtr.write_record(["state", "period", "marginal_pd", "cumulative_pd", "survival"]);
    for (state, points) in curves {
        for point in points.as_array().into_iter().flatten() {
            let field = |k: &str| point.get(k).map(format_csv_value).unwrap_or_default();
            let _ = wtr.write_record([
                state.clone(),
                field("period"),
                field("marginal_pd"),
                field("cumulative_pd"),
                field("survival"),
            ]);
        }
    }
}

fn write_array_csv(wtr: &mut csv::Writer<io::StdoutLock<'_>>, arr: &[Value]) {
    if arr.is_empty() {
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<&str> = first.keys().map(|k| k.as_str()).collect();
        let _ = wtr.write_record(&headers);

        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(*h).map(format_csv_value).unwrap_or_default())
                    .collect();
                let _ = wtr.write_record(&row);
            }
        }
    } else {
        for item in arr {
            let _ = wtr.write_record([&format_csv_value(item)]);
        }
    }
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Object(map) if map.contains_key("stage") => {
            map.get("stage").map(format_csv_value).unwrap_or_default()
        }
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
