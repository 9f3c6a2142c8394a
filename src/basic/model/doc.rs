use std::fmt::Write;

use tabled::{Table, Tabled, settings::Style};

use super::{Model, ServiceKind};

#[derive(Tabled)]
struct ParamRow {
    name: String,
    description: String,
    default: String,
    unit: String,
    properties: String,
}

#[derive(Tabled)]
struct VarRow {
    name: String,
    #[tabled(rename = "type")]
    kind: &'static str,
    description: String,
    unit: String,
}

#[derive(Tabled)]
struct EquationRow {
    name: String,
    #[tabled(rename = "type")]
    kind: &'static str,
    equation: String,
}

#[derive(Tabled)]
struct ServiceRow {
    name: String,
    equation: String,
    #[tabled(rename = "type")]
    kind: String,
}

#[derive(Tabled)]
struct DiscreteRow {
    name: String,
    input: String,
    lower: String,
    upper: String,
    info: String,
}

#[derive(Tabled)]
struct ConfigRow {
    option: String,
    value: f64,
}

fn section<T: Tabled>(out: &mut String, title: &str, rows: Vec<T>) {
    if rows.is_empty() {
        return;
    }
    let _ = writeln!(out, "\n### {title}\n");
    let _ = writeln!(out, "{}", Table::new(rows).with(Style::markdown()));
}

impl Model {
    /// Markdown description of parameters, variables, equations,
    /// initializers, services, limiters, blocks and config.
    pub fn doc(&self) -> String {
        let mut out = format!("## {} ({})\n", self.name, self.group);
        if !self.info.is_empty() {
            let _ = writeln!(out, "\n{}", self.info);
        }

        let params = self
            .data
            .num_params
            .values()
            .map(|p| {
                let props: Vec<&str> = [
                    (p.mandatory, "mandatory"),
                    (p.non_zero, "non_zero"),
                    (p.power, "power"),
                    (p.z, "z"),
                ]
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, s)| *s)
                .collect();
                ParamRow {
                    name: p.name.clone(),
                    description: p.info.clone(),
                    default: p.default.map(|d| d.to_string()).unwrap_or_default(),
                    unit: p.unit.clone(),
                    properties: props.join(","),
                }
            })
            .chain(self.data.idx_params.values().map(|p| ParamRow {
                name: p.name.clone(),
                description: p.info.clone(),
                default: String::new(),
                unit: String::new(),
                properties: p.model.clone().map(|m| format!("idx of {m}")).unwrap_or_default(),
            }))
            .chain(self.ext_params.values().map(|p| ParamRow {
                name: p.name.clone(),
                description: p.info.clone(),
                default: String::new(),
                unit: String::new(),
                properties: format!("{}.{} by {}", p.model, p.src, p.indexer),
            }))
            .collect();
        section(&mut out, "Parameters", params);

        let vars = self
            .vars
            .values()
            .map(|v| VarRow {
                name: v.name.clone(),
                kind: v.kind.name(),
                description: v.info.clone(),
                unit: v.unit.clone(),
            })
            .collect();
        section(&mut out, "Variables", vars);

        let equations = self
            .vars
            .values()
            .filter_map(|v| {
                v.e_str.as_ref().map(|e| EquationRow {
                    name: v.name.clone(),
                    kind: v.kind.name(),
                    equation: e.clone(),
                })
            })
            .collect();
        section(&mut out, "Equations", equations);

        let inits = self
            .vars
            .values()
            .filter_map(|v| {
                let (kind, eq) = match (&v.v_str, &v.v_iter) {
                    (_, Some(it)) => ("iterative", it),
                    (Some(s), None) => ("explicit", s),
                    (None, None) => return None,
                };
                Some(EquationRow {
                    name: v.name.clone(),
                    kind,
                    equation: eq.clone(),
                })
            })
            .collect();
        section(&mut out, "Initialization", inits);

        let services = self
            .services
            .values()
            .map(|s| {
                let (equation, kind) = match &s.kind {
                    ServiceKind::Const(e) => (e.clone(), "const".to_string()),
                    ServiceKind::Ext(r) => (
                        format!("{}.{} by {}", r.model, r.src, r.indexer),
                        "ext".to_string(),
                    ),
                    ServiceKind::Numeric(_) => (String::new(), "numeric".to_string()),
                };
                let kind = if s.inverse { format!("{kind}, inverse") } else { kind };
                ServiceRow {
                    name: s.name.clone(),
                    equation,
                    kind,
                }
            })
            .collect();
        section(&mut out, "Services", services);

        let discrete = self
            .discrete
            .values()
            .map(|l| DiscreteRow {
                name: l.name.clone(),
                input: l.u.clone(),
                lower: l.lower.clone(),
                upper: l.upper.clone(),
                info: l.info.clone(),
            })
            .collect();
        section(&mut out, "Discrete", discrete);

        let blocks = self
            .blocks
            .values()
            .map(|b| VarRow {
                name: b.name.clone(),
                kind: "block",
                description: b.info.clone(),
                unit: b
                    .vars
                    .iter()
                    .map(|v| v.name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            })
            .collect();
        section(&mut out, "Blocks", blocks);

        let config = self
            .config
            .iter()
            .map(|(k, v)| ConfigRow {
                option: k.clone(),
                value: *v,
            })
            .collect();
        section(&mut out, "Config", config);
        out
    }
}
