use crate::basic::model::{IdxParam, Model, NumParam, Var};

/// Angle and voltage reference; absorbs the power mismatch.
pub fn slack() -> Model {
    Model::new("Slack", "StaticGen")
        .info("slack generator")
        .with(IdxParam::new("bus").model("Bus").mandatory().info("linked bus"))
        .with(NumParam::new("Sn").default(100.0).info("power rating").unit("MVA").non_zero())
        .with(NumParam::new("Vn").default(110.0).info("AC voltage rating").unit("kV").non_zero())
        .with(NumParam::new("p0").default(0.0).info("initial active power").unit("p.u.").power())
        .with(NumParam::new("q0").default(0.0).info("initial reactive power").unit("p.u.").power())
        .with(NumParam::new("v0").default(1.0).info("voltage set point").unit("p.u.").non_zero())
        .with(NumParam::new("a0").default(0.0).info("reference angle").unit("rad").tex("\\theta_0"))
        .with(
            Var::algeb("p")
                .info("active power output")
                .unit("p.u.")
                .v_str("p0")
                .e_str("u * (a - a0) + (1 - u) * p"),
        )
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
                .v_str("a0")
                .v_setter()
                .e_str("-u * p"),
        )
        .with(
            Var::ext_algeb("v", "Bus", "v", "bus")
                .info("bus voltage magnitude")
                .v_str("v0")
                .v_setter()
                .e_str("-u * q"),
        )
}
