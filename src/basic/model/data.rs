use std::{collections::HashMap, io};

use indexmap::IndexMap;
use log::warn;
use serde_json::Value;

use crate::basic::error::{DaeError, Result};

use super::param::{DataParam, Idx, IdxParam, NumParam, ParamProp};

/// Device container: the per-device parameter arrays of one model and the
/// idx to position map.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub name: String,
    pub n: usize,
    pub idx: Vec<Idx>,
    uid: HashMap<Idx, usize>,
    pub num_params: IndexMap<String, NumParam>,
    pub idx_params: IndexMap<String, IdxParam>,
    pub data_params: IndexMap<String, DataParam>,
}

fn json_to_f64(model: &str, key: &str, value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(f64::from(u8::from(*b)))),
        Value::Number(n) => Ok(n.as_f64()),
        Value::String(s) => s.trim().parse::<f64>().map(Some).map_err(|_| DaeError::Data {
            model: model.to_string(),
            msg: format!("<{key}> expects a number, got \"{s}\""),
        }),
        other => Err(DaeError::Data {
            model: model.to_string(),
            msg: format!("<{key}> expects a number, got {other}"),
        }),
    }
}

fn json_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl ModelData {
    pub fn new(name: &str) -> Self {
        let mut num_params = IndexMap::new();
        num_params.insert(
            "u".to_string(),
            NumParam::new("u").default(1.0).info("connection status"),
        );
        let mut data_params = IndexMap::new();
        data_params.insert(
            "name".to_string(),
            DataParam::new("name").info("device name"),
        );
        Self {
            name: name.to_string(),
            n: 0,
            idx: Vec::new(),
            uid: HashMap::new(),
            num_params,
            idx_params: IndexMap::new(),
            data_params,
        }
    }

    fn is_input_key(&self, key: &str) -> bool {
        key == "idx"
            || self.num_params.contains_key(key)
            || self.idx_params.contains_key(key)
            || self.data_params.contains_key(key)
    }

    /// Adds one device from a keyword record and returns its idx.
    ///
    /// A missing `idx` is generated as `<Model>_<n+1>`. Keys that match no
    /// parameter are reported with a warning and otherwise ignored.
    pub fn add(&mut self, record: &Value) -> Result<Idx> {
        let obj = record.as_object().ok_or_else(|| DaeError::Data {
            model: self.name.clone(),
            msg: "device record must be a JSON object".to_string(),
        })?;

        let idx = match obj.get("idx") {
            Some(v) if !v.is_null() => Idx::from_json(v).ok_or_else(|| DaeError::Data {
                model: self.name.clone(),
                msg: format!("invalid idx {v}"),
            })?,
            _ => Idx::Str(format!("{}_{}", self.name, self.n + 1)),
        };
        if self.uid.contains_key(&idx) {
            return Err(DaeError::Data {
                model: self.name.clone(),
                msg: format!("duplicate idx {idx}"),
            });
        }

        // validate everything before touching the arrays
        let mut nums = Vec::with_capacity(self.num_params.len());
        for (name, p) in &self.num_params {
            let value = match obj.get(name.as_str()) {
                Some(v) => json_to_f64(&self.name, name, v)?,
                None => None,
            };
            if value.is_none() && p.mandatory {
                return Err(DaeError::MissingParam {
                    model: self.name.clone(),
                    param: name.clone(),
                    idx: idx.to_string(),
                });
            }
            nums.push(value);
        }
        let mut idxs = Vec::with_capacity(self.idx_params.len());
        for (name, p) in &self.idx_params {
            let value = obj.get(name.as_str()).and_then(Idx::from_json);
            if value.is_none() && p.mandatory {
                return Err(DaeError::MissingParam {
                    model: self.name.clone(),
                    param: name.clone(),
                    idx: idx.to_string(),
                });
            }
            idxs.push(value);
        }

        for (p, value) in self.num_params.values_mut().zip(nums) {
            p.push(value);
        }
        for (p, value) in self.idx_params.values_mut().zip(idxs) {
            p.v.push(value);
        }
        for (name, p) in self.data_params.iter_mut() {
            let value = obj
                .get(name.as_str())
                .and_then(json_to_string)
                .or_else(|| p.default.clone())
                .unwrap_or_else(|| idx.to_string());
            p.v.push(value);
        }

        for key in obj.keys() {
            if !self.is_input_key(key) {
                warn!("{}: unused data {{{key}: {}}}", self.name, obj[key]);
            }
        }

        self.uid.insert(idx.clone(), self.n);
        self.idx.push(idx.clone());
        self.n += 1;
        Ok(idx)
    }

    /// Position of a device in the parameter arrays.
    pub fn idx2uid(&self, idx: &Idx) -> Result<usize> {
        self.uid.get(idx).copied().ok_or_else(|| DaeError::Lookup {
            model: self.name.clone(),
            what: format!("idx {idx}"),
        })
    }

    fn field(&self, key: &str, uid: usize) -> Option<Value> {
        if key == "idx" {
            return Some(self.idx[uid].to_json());
        }
        if let Some(p) = self.num_params.get(key) {
            return Some(Value::from(p.v[uid]));
        }
        if let Some(p) = self.idx_params.get(key) {
            return Some(p.v[uid].as_ref().map_or(Value::Null, Idx::to_json));
        }
        self.data_params
            .get(key)
            .map(|p| Value::from(p.v[uid].as_str()))
    }

    fn matches(&self, key: &str, uid: usize, expected: &Value) -> bool {
        match (self.field(key, uid), expected) {
            (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Some(actual), expected) => &actual == expected,
            (None, _) => false,
        }
    }

    /// Finds devices by conjunctive field match.
    ///
    /// `values[k][j]` is the value of `keys[k]` for the `j`-th query; every
    /// query scans the devices in insertion order. Unmatched queries are an
    /// error unless `allow_missing`, in which case they yield `None`.
    pub fn find_idx(
        &self,
        keys: &[&str],
        values: &[Vec<Value>],
        allow_missing: bool,
    ) -> Result<Vec<Option<Idx>>> {
        if keys.len() != values.len() {
            return Err(DaeError::Data {
                model: self.name.clone(),
                msg: format!("{} keys but {} value lists", keys.len(), values.len()),
            });
        }
        for key in keys {
            if *key != "idx" && !self.is_input_key(key) {
                return Err(DaeError::UnknownAttribute {
                    model: self.name.clone(),
                    attr: key.to_string(),
                });
            }
        }
        let nquery = values.first().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(nquery);
        for j in 0..nquery {
            let found = (0..self.n).find(|&uid| {
                keys.iter()
                    .zip(values)
                    .all(|(key, vals)| vals.get(j).is_some_and(|v| self.matches(key, uid, v)))
            });
            match found {
                Some(uid) => out.push(Some(self.idx[uid].clone())),
                None if allow_missing => out.push(None),
                None => {
                    let query: Vec<String> = keys
                        .iter()
                        .zip(values)
                        .map(|(k, v)| format!("{k}={}", v.get(j).unwrap_or(&Value::Null)))
                        .collect();
                    return Err(DaeError::Lookup {
                        model: self.name.clone(),
                        what: format!("device with {}", query.join(", ")),
                    });
                }
            }
        }
        Ok(out)
    }

    /// Names of the numeric parameters carrying `prop`.
    pub fn find_param(&self, prop: ParamProp) -> Vec<&str> {
        self.num_params
            .values()
            .filter(|p| p.has(prop))
            .map(|p| p.name.as_str())
            .collect()
    }

    /// Tabular view: `uid`, `idx`, then every exported parameter in
    /// declaration order. `vin` selects raw inputs over converted values.
    pub fn as_dict(&self, vin: bool) -> IndexMap<String, Vec<Value>> {
        let mut out = IndexMap::new();
        out.insert("uid".to_string(), (0..self.n).map(Value::from).collect());
        out.insert("idx".to_string(), self.idx.iter().map(Idx::to_json).collect());
        for p in self.num_params.values().filter(|p| p.export) {
            let src = if vin { &p.vin } else { &p.v };
            out.insert(p.name.clone(), src.iter().map(|v| Value::from(*v)).collect());
        }
        for p in self.idx_params.values() {
            out.insert(
                p.name.clone(),
                p.v.iter()
                    .map(|v| v.as_ref().map_or(Value::Null, Idx::to_json))
                    .collect(),
            );
        }
        for p in self.data_params.values() {
            out.insert(p.name.clone(), p.v.iter().map(|v| Value::from(v.as_str())).collect());
        }
        out
    }

    /// Writes [`ModelData::as_dict`] as CSV, one row per device.
    pub fn write_csv<W: io::Write>(&self, writer: W, vin: bool) -> Result<()> {
        let table = self.as_dict(vin);
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(table.keys())?;
        for uid in 0..self.n {
            let row = table.values().map(|col| match &col[uid] {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            });
            wtr.write_record(row)?;
        }
        wtr.flush().map_err(csv::Error::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bus_data() -> ModelData {
        let mut d = ModelData::new("Bus");
        d.num_params.insert("Vn".into(), NumParam::new("Vn").default(110.0));
        d.num_params.insert("v0".into(), NumParam::new("v0").default(1.0).non_zero());
        d.idx_params.insert("area".into(), IdxParam::new("area").model("Area"));
        d
    }

    #[test]
    fn test_idx2uid_is_insertion_order() {
        let mut d = bus_data();
        let ids = [json!(10), json!("B2"), json!(3)];
        for id in &ids {
            d.add(&json!({"idx": id, "Vn": 230})).unwrap();
        }
        assert_eq!(d.n, 3);
        for (k, id) in ids.iter().enumerate() {
            let idx = Idx::from_json(id).unwrap();
            assert_eq!(d.idx2uid(&idx).unwrap(), k);
            assert_eq!(d.idx[k], idx);
        }
        assert!(matches!(
            d.idx2uid(&Idx::Int(99)),
            Err(DaeError::Lookup { .. })
        ));
    }

    #[test]
    fn test_add_defaults_and_generated_idx() {
        let mut d = bus_data();
        let idx = d.add(&json!({"v0": 0, "bogus": 1})).unwrap();
        assert_eq!(idx, Idx::from("Bus_1"));
        assert_eq!(d.num_params["u"].v, vec![1.0]);
        assert_eq!(d.num_params["v0"].v, vec![1.0]);
        assert_eq!(d.data_params["name"].v, vec!["Bus_1".to_string()]);
        assert!(d.add(&json!({"idx": "Bus_1"})).is_err());
        assert!(d.add(&json!([1, 2])).is_err());
        assert_eq!(d.n, 1);
    }

    #[test]
    fn test_mandatory_missing_leaves_arrays_intact() {
        let mut d = bus_data();
        d.num_params.insert("p0".into(), NumParam::new("p0").mandatory());
        let err = d.add(&json!({"idx": 1})).unwrap_err();
        assert!(matches!(err, DaeError::MissingParam { .. }));
        assert_eq!(d.n, 0);
        assert!(d.num_params["u"].v.is_empty());
    }

    #[test]
    fn test_find_idx() {
        let mut d = bus_data();
        d.add(&json!({"idx": 1, "name": "North", "Vn": 110})).unwrap();
        d.add(&json!({"idx": 2, "name": "South", "Vn": 230})).unwrap();
        d.add(&json!({"idx": 3, "name": "South", "Vn": 110})).unwrap();

        let found = d
            .find_idx(&["name", "Vn"], &[vec![json!("South")], vec![json!(110.0)]], false)
            .unwrap();
        assert_eq!(found, vec![Some(Idx::Int(3))]);

        let found = d
            .find_idx(&["name"], &[vec![json!("East"), json!("North")]], true)
            .unwrap();
        assert_eq!(found, vec![None, Some(Idx::Int(1))]);

        assert!(matches!(
            d.find_idx(&["name"], &[vec![json!("East")]], false),
            Err(DaeError::Lookup { .. })
        ));
        assert!(d.find_idx(&["color"], &[vec![json!(1)]], true).is_err());
    }

    #[test]
    fn test_as_dict_and_csv() {
        let mut d = bus_data();
        d.add(&json!({"idx": "a", "Vn": 20, "area": 1})).unwrap();
        d.add(&json!({"idx": "b"})).unwrap();
        let table = d.as_dict(true);
        let cols: Vec<_> = table.keys().cloned().collect();
        assert_eq!(cols, vec!["uid", "idx", "u", "Vn", "v0", "area", "name"]);
        assert_eq!(table["Vn"], vec![json!(20.0), json!(110.0)]);

        let mut buf = Vec::new();
        d.write_csv(&mut buf, true).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("uid,idx,u,Vn,v0,area,name"));
        assert_eq!(lines.next(), Some("0,a,1.0,20.0,1.0,1,a"));
        assert_eq!(lines.next(), Some("1,b,1.0,110.0,1.0,,b"));
    }
}
