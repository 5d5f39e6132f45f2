use proptest::prelude::*;
use shapeflow_core::ir::{Dim, ElementKind, Graph, Model, Node, Shape, Type};
use shapeflow_core::symbolic::{broadcast_shapes, refines};
use shapeflow_core::ShapeInference;

fn float(shape: Shape) -> Type {
    Type::tensor(ElementKind::Float, shape)
}

/// Add, Transpose and Shape->Reshape over one input of the given type
fn pipeline(x: Type, dims: &[u64]) -> Model {
    let total: u64 = dims.iter().product();
    let graph = Graph::new("main")
        .with_input("x", x)
        .with_input("w", float(Shape::known(dims)))
        .with_input("flat", float(Shape::known(&[total])))
        .with_output("sum", None)
        .with_output("transposed", None)
        .with_output("reshaped", None)
        .with_node(Node::new("Add").with_inputs(["x", "w"]).with_output("sum"))
        .with_node(Node::new("Transpose").with_input("sum").with_output("transposed"))
        .with_node(Node::new("Shape").with_input("x").with_output("dims"))
        .with_node(Node::new("Reshape").with_inputs(["flat", "dims"]).with_output("reshaped"));
    Model::new(graph).with_opset("", 18)
}

fn outputs(model: &Model) -> Vec<Option<Type>> {
    ShapeInference::new().infer(model).unwrap().outputs
}

fn coarsen(dims: &[u64], mask: &[u8]) -> Shape {
    Shape::from_dims(dims.iter().zip(mask).map(|(&dim, &choice)| match choice {
        0 => Dim::Unknown,
        1 => Dim::symbol("S"),
        _ => Dim::Known(dim),
    }))
}

fn shape_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1u64..=3, 0..=4)
}

proptest! {
    #[test]
    fn test_broadcast_is_symmetric(a in shape_strategy(), b in shape_strategy()) {
        let (a, b) = (Shape::known(&a), Shape::known(&b));
        prop_assert_eq!(broadcast_shapes(&a, &b).ok(), broadcast_shapes(&b, &a).ok());
    }

    #[test]
    fn test_more_precise_inputs_never_lose_precision(
        dims in prop::collection::vec(1u64..=5, 1..=3),
        mask in prop::collection::vec(0u8..=2, 3),
        unranked in any::<bool>(),
    ) {
        let coarse_shape = if unranked { Shape::Unranked } else { coarsen(&dims, &mask) };
        let fine = outputs(&pipeline(float(Shape::known(&dims)), &dims));
        let coarse = outputs(&pipeline(float(coarse_shape), &dims));
        for (fine, coarse) in fine.iter().zip(&coarse) {
            prop_assert!(
                refines(fine.as_ref(), coarse.as_ref()),
                "{:?} is less precise than {:?}", fine, coarse
            );
        }
    }

    #[test]
    fn test_unknown_input_never_fails(dims in prop::collection::vec(1u64..=5, 1..=3)) {
        let model = pipeline(Type::unranked(ElementKind::Float), &dims);
        prop_assert!(ShapeInference::new().infer(&model).is_ok());
    }
}
