use crate::basic::model::{DataParam, IdxParam, Model, NumParam, Var};

pub fn bus() -> Model {
    Model::new("Bus", "Bus")
        .info("AC bus")
        .with(
            NumParam::new("Vn")
                .default(110.0)
                .info("nominal voltage")
                .unit("kV")
                .non_zero(),
        )
        .with(NumParam::new("vmax").default(1.1).info("voltage upper limit").unit("p.u."))
        .with(NumParam::new("vmin").default(0.9).info("voltage lower limit").unit("p.u."))
        .with(
            NumParam::new("v0")
                .default(1.0)
                .info("initial voltage magnitude")
                .unit("p.u.")
                .non_zero()
                .tex("V_0"),
        )
        .with(
            NumParam::new("a0")
                .default(0.0)
                .info("initial voltage angle")
                .unit("rad")
                .tex("\\theta_0"),
        )
        .with(IdxParam::new("area").model("Area").info("area code"))
        .with(DataParam::new("owner").info("owner code"))
        .with(
            Var::algeb("a")
                .info("voltage angle")
                .unit("rad")
                .tex("\\theta")
                .v_str("a0"),
        )
        .with(
            Var::algeb("v")
                .info("voltage magnitude")
                .unit("p.u.")
                .tex("V")
                .v_str("v0"),
        )
}
