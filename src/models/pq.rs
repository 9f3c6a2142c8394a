use crate::basic::model::{IdxParam, Limiter, Model, NumParam, Service, Var};

/// Constant power load. With `pq2z` enabled the load turns into a constant
/// impedance once the voltage leaves `[vmin, vmax]`.
pub fn pq() -> Model {
    Model::new("PQ", "StaticLoad")
        .info("PQ load")
        .with_config("pq2z", 1.0)
        .with(IdxParam::new("bus").model("Bus").mandatory().info("linked bus"))
        .with(NumParam::new("Vn").default(110.0).info("AC voltage rating").unit("kV").non_zero())
        .with(NumParam::new("p0").default(0.0).info("active power load").unit("p.u.").tex("P_0"))
        .with(NumParam::new("q0").default(0.0).info("reactive power load").unit("p.u.").tex("Q_0"))
        .with(NumParam::new("vmax").default(1.1).info("max voltage before conversion").unit("p.u."))
        .with(NumParam::new("vmin").default(0.9).info("min voltage before conversion").unit("p.u."))
        .with(Service::constant("pz_u", "p0 / vmax**2").info("impedance P at upper limit"))
        .with(Service::constant("pz_l", "p0 / vmin**2").info("impedance P at lower limit"))
        .with(Service::constant("qz_u", "q0 / vmax**2").info("impedance Q at upper limit"))
        .with(Service::constant("qz_l", "q0 / vmin**2").info("impedance Q at lower limit"))
        .with(
            Limiter::new("vcmp", "v", "vmin", "vmax")
                .info("voltage comparer")
                .enable("pq2z"),
        )
        .with(
            Var::ext_algeb("a", "Bus", "a", "bus")
                .info("bus voltage angle")
                .e_str("u * (p0 * vcmp_zi + pz_l * v**2 * vcmp_zl + pz_u * v**2 * vcmp_zu)"),
        )
        .with(
            Var::ext_algeb("v", "Bus", "v", "bus")
                .info("bus voltage magnitude")
                .e_str("u * (q0 * vcmp_zi + qz_l * v**2 * vcmp_zl + qz_u * v**2 * vcmp_zu)"),
        )
}
