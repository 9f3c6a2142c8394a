use crate::basic::model::{IdxParam, Model, NumParam, Var};

/// Generator holding active power and voltage magnitude.
pub fn pv() -> Model {
    Model::new("PV", "StaticGen")
        .info("PV generator")
        .with(IdxParam::new("bus").model("Bus").mandatory().info("linked bus"))
        .with(NumParam::new("Sn").default(100.0).info("power rating").unit("MVA").non_zero())
        .with(NumParam::new("Vn").default(110.0).info("AC voltage rating").unit("kV").non_zero())
        .with(NumParam::new("p0").default(0.0).info("active power set point").unit("p.u.").power())
        .with(NumParam::new("q0").default(0.0).info("initial reactive power").unit("p.u.").power())
        .with(NumParam::new("pmax").default(999.0).info("max active power").unit("p.u.").power())
        .with(NumParam::new("pmin").default(-1.0).info("min active power").unit("p.u.").power())
        .with(NumParam::new("qmax").default(999.0).info("max reactive power").unit("p.u.").power())
        .with(NumParam::new("qmin").default(-999.0).info("min reactive power").unit("p.u.").power())
        .with(NumParam::new("v0").default(1.0).info("voltage set point").unit("p.u.").non_zero())
        .with(
            Var::algeb("q")
                .info("reactive power output")
                .unit("p.u.")
                .v_str("q0")
                .e_str("u * (v - v0) + (1 - u) * q"),
        )
        .with(
            Var::ext_algeb("a", "Bus", "a", "bus")
                .info("bus voltage angle")
                .e_str("-u * p0"),
        )
        .with(
            Var::ext_algeb("v", "Bus", "v", "bus")
                .info("bus voltage magnitude")
                .v_str("v0")
                .v_setter()
                .e_str("-u * q"),
        )
}
