use serde_json::{Map, Value};
use tabled::{builder::Builder, Table};

/// Columns shown for each exposure of an impairment run.
const EXPOSURE_COLUMNS: [&str; 9] = [
    "exposure_id",
    "segment",
    "stage",
    "horizon",
    "ead",
    "pd_12m",
    "pd_lifetime",
    "lgd",
    "ecl",
];

/// Format output as tables using the tabled crate.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result(result);
                print_envelope_notes(map);
            } else {
                print_flat_object(map);
            }
        }
        Value::Array(arr) => print_array_table(arr, None),
        _ => println!("{}", value),
    }
}

fn print_result(result: &Value) {
    match result {
        Value::Object(res) if res.contains_key("run") => print_impairment(res),
        Value::Object(res) if res.contains_key("rows") => {
            print_scalars(res);
            print_section("Schedule", res.get("rows"), None);
        }
        Value::Object(res) if res.contains_key("points") => {
            print_scalars(res);
            print_section("Workout", res.get("points"), None);
        }
        Value::Object(res) if res.contains_key("curves") => print_curves(res),
        Value::Object(res) if res.contains_key("point_in_time") => {
            if let Some(Value::Object(pit)) = res.get("point_in_time") {
                println!("Point-in-time");
                print_curves(pit);
            }
        }
        Value::Object(res) => print_flat_object(res),
        Value::Array(arr) => print_array_table(arr, None),
        other => println!("{}", format_value(other)),
    }
}

fn print_impairment(result: &Map<String, Value>) {
    let Some(Value::Object(run)) = result.get("run") else {
        return;
    };

    if let Some(Value::Object(total)) = run.get("total") {
        println!("Portfolio");
        print_flat_object(total);
    }

    for (title, key) in [("By stage", "by_stage"), ("By segment", "by_segment")] {
        if let Some(Value::Object(groups)) = run.get(key) {
            let rows: Vec<Value> = groups
                .iter()
                .map(|(name, totals)| {
                    let mut row = Map::new();
                    row.insert("group".into(), Value::String(name.clone()));
                    if let Value::Object(t) = totals {
                        row.extend(t.clone());
                    }
                    Value::Object(row)
                })
                .collect();
            println!("\n{title}");
            print_array_table(&rows, None);
        }
    }

    print_section("Exposures", run.get("exposures"), Some(&EXPOSURE_COLUMNS[..]));
    if let Some(Value::Array(exceptions)) = run.get("exceptions") {
        if !exceptions.is_empty() {
            print_section("Exceptions", run.get("exceptions"), None);
        }
    }
}

/// One row per period, one column per state's cumulative PD.
fn print_curves(term_structure: &Map<String, Value>) {
    let Some(Value::Object(curves)) = term_structure.get("curves") else {
        print_flat_object(term_structure);
        return;
    };
    let states: Vec<&String> = curves.keys().collect();
    let periods = curves
        .values()
        .filter_map(Value::as_array)
        .map(Vec::len)
        .max()
        .unwrap_or(0);

    let mut builder = Builder::default();
    let mut header = vec!["period".to_string()];
    header.extend(states.iter().map(|s| s.to_string()));
    builder.push_record(header);

    for i in 0..periods {
        let mut row = vec![(i + 1).to_string()];
        for state in &states {
            let cell = curves
                .get(state.as_str())
                .and_then(|c| c.get(i))
                .and_then(|p| p.get("cumulative_pd"))
                .map(format_value)
                .unwrap_or_default();
            row.push(cell);
        }
        builder.push_record(row);
    }
    println!("Cumulative PD");
    println!("{}", Table::from(builder));
}

fn print_section(title: &str, value: Option<&Value>, columns: Option<&[&str]>) {
    if let Some(Value::Array(arr)) = value {
        println!("\n{title}");
        print_array_table(arr, columns);
    }
}

/// Key/value table of the non-collection fields of an object.
fn print_scalars(map: &Map<String, Value>) {
    let scalars: Map<String, Value> = map
        .iter()
        .filter(|(_, v)| !v.is_array() && !v.is_object())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    print_flat_object(&scalars);
}

fn print_envelope_notes(envelope: &Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }

    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn print_flat_object(map: &Map<String, Value>) {
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    for (key, val) in map {
        builder.push_record([key.as_str(), &format_value(val)]);
    }
    println!("{}", Table::from(builder));
}

fn print_array_table(arr: &[Value], columns: Option<&[&str]>) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers: Vec<String> = match columns {
            Some(cols) => cols.iter().map(|c| c.to_string()).collect(),
            None => first.keys().cloned().collect(),
        };
        let mut builder = Builder::default();
        builder.push_record(&headers);

        for item in arr {
            if let Value::Object(map) = item {
                let row: Vec<String> = headers
                    .iter()
                    .map(|h| map.get(h.as_str()).map(format_value).unwrap_or_default())
                    .collect();
                builder.push_record(row);
            }
        }
        println!("{}", Table::from(builder));
    } else {
        for item in arr {
            println!("{}", format_value(item));
        }
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "-".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        Value::Object(map) if map.contains_key("stage") && map.len() <= 2 => map
            .get("stage")
            .map(format_value)
            .unwrap_or_default(),
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
