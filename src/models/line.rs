use num_complex::Complex64;

use crate::basic::{
    model::{IdxParam, Model, NumParam, Service, Var},
    symbolic::Frame,
};

/// Series admittance `1 / (r + jx)`, real part when `imag` is false.
fn series_admittance(frame: &Frame, imag: bool) -> Vec<f64> {
    let (Some(r), Some(x)) = (frame.get("r"), frame.get("x")) else {
        return Vec::new();
    };
    r.iter()
        .zip(x)
        .map(|(&r, &x)| {
            let y = Complex64::new(r, x).inv();
            if imag { y.im } else { y.re }
        })
        .collect()
}

/// Pi-model AC line.
pub fn line() -> Model {
    Model::new("Line", "ACLine")
        .info("AC transmission line")
        .with(IdxParam::new("bus1").model("Bus").mandatory().info("from bus"))
        .with(IdxParam::new("bus2").model("Bus").mandatory().info("to bus"))
        .with(NumParam::new("Sn").default(100.0).info("power rating").unit("MVA").non_zero())
        .with(NumParam::new("Vn1").default(110.0).info("from-side rating").unit("kV").non_zero())
        .with(NumParam::new("Vn2").default(110.0).info("to-side rating").unit("kV").non_zero())
        .with(NumParam::new("r").default(1e-8).info("series resistance").unit("p.u.").z())
        .with(
            NumParam::new("x")
                .default(1e-8)
                .info("series reactance")
                .unit("p.u.")
                .non_zero()
                .z(),
        )
        .with(NumParam::new("g").default(0.0).info("shunt conductance").unit("p.u.").power())
        .with(NumParam::new("b").default(0.0).info("shunt susceptance").unit("p.u.").power())
        .with(Service::constant("gh", "0.5 * g").info("half shunt conductance"))
        .with(Service::constant("bh", "0.5 * b").info("half shunt susceptance"))
        .with(Service::numeric("gs", |f| series_admittance(f, false)).info("series conductance"))
        .with(Service::numeric("bs", |f| series_admittance(f, true)).info("series susceptance"))
        .with(
            Var::ext_algeb("a1", "Bus", "a", "bus1")
                .info("from bus angle")
                .e_str("u * (v1**2 * (gs + gh) - v1 * v2 * (gs * cos(a1 - a2) + bs * sin(a1 - a2)))"),
        )
        .with(
            Var::ext_algeb("a2", "Bus", "a", "bus2")
                .info("to bus angle")
                .e_str("u * (v2**2 * (gs + gh) - v1 * v2 * (gs * cos(a1 - a2) - bs * sin(a1 - a2)))"),
        )
        .with(
            Var::ext_algeb("v1", "Bus", "v", "bus1")
                .info("from bus voltage")
                .e_str("u * (-v1**2 * (bs + bh) - v1 * v2 * (gs * sin(a1 - a2) - bs * cos(a1 - a2)))"),
        )
        .with(
            Var::ext_algeb("v2", "Bus", "v", "bus2")
                .info("to bus voltage")
                .e_str("u * (-v2**2 * (bs + bh) + v1 * v2 * (gs * sin(a1 - a2) + bs * cos(a1 - a2)))"),
        )
}
