// Prototype serialization
use super::{new_vm, num};
use crate::lua_value::{Prototype, ProtoBuilder};
use crate::lua_vm::{JitMode, OpCode};

#[test]
fn test_prototype_json_round_trip() {
    let mut child = ProtoBuilder::new("=test");
    child.params(1).max_stack(2).local("x", 0, 2);
    let k = child.rk(0.5);
    child.abc(OpCode::Mul, 1, 0, k);
    child.abc(OpCode::Return, 1, 2, 0);
    child.abc(OpCode::Return, 0, 1, 0);

    let mut b = ProtoBuilder::main("=test");
    b.max_stack(2);
    let p = b.child(child.build());
    let k = b.constant(9);
    b.abx(OpCode::Closure, 0, p);
    b.abx(OpCode::LoadK, 1, k);
    b.abc(OpCode::Call, 0, 2, 2);
    b.abc(OpCode::Return, 0, 2, 0);
    b.abc(OpCode::Return, 0, 1, 0);
    let proto = b.build();

    let json = serde_json::to_string(&*proto).unwrap();
    let restored: Prototype = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.code, proto.code);
    assert_eq!(restored.constants, proto.constants);
    assert_eq!(restored.protos[0].loc_vars.len(), 1);
    // identities are fresh after deserialization
    assert_ne!(restored.id(), proto.id());
    assert_ne!(restored.protos[0].id(), proto.protos[0].id());

    let mut vm = new_vm(JitMode::Strict);
    assert_eq!(vm.execute(restored.into()).unwrap(), vec![num(4.5)]);
}
